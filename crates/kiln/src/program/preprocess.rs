//! Conditional compilation for WGSL sources.
//!
//! WGSL has no preprocessor, so defines are applied in two ways: `#ifdef`,
//! `#ifndef`, `#if`, `#else` and `#endif` lines select which source lines are
//! kept, and every define with a value becomes a module-scope `const`. Removed
//! lines are blanked rather than dropped and the constants go after the
//! program source, so compiler diagnostics keep pointing at the original line
//! numbers.

use std::fmt::Write;

use super::DefineList;

struct Block {
    /// Whether the enclosing block is emitting lines.
    parent_active: bool,
    condition: bool,
    in_else: bool,
}

impl Block {
    fn is_active(&self) -> bool {
        self.parent_active && (self.condition != self.in_else)
    }
}

fn is_truthy(defines: &DefineList, expression: &str) -> bool {
    if let Ok(value) = expression.parse::<i64>() {
        return value != 0;
    }

    match defines.get(expression) {
        Some(value) => !matches!(value.trim(), "" | "0" | "false"),
        None => false,
    }
}

/// Resolves conditional directives in `source`, blanking the lines they
/// remove. Errors carry the offending line number.
pub(crate) fn preprocess(source: &str, defines: &DefineList) -> Result<String, String> {
    let mut output = String::with_capacity(source.len());
    let mut blocks: Vec<Block> = Vec::new();

    for (index, line) in source.lines().enumerate() {
        let line_number = index + 1;
        let active = blocks.last().map_or(true, Block::is_active);
        let trimmed = line.trim_start();

        let Some(directive) = trimmed.strip_prefix('#') else {
            if active {
                output.push_str(line);
            }
            output.push('\n');
            continue;
        };

        let mut parts = directive.split_whitespace();
        let keyword = parts.next().unwrap_or_default();
        let argument = parts.next();

        let condition = |keyword: &str| {
            argument
                .map(|name| match keyword {
                    "ifdef" => defines.contains(name),
                    "ifndef" => !defines.contains(name),
                    _ => is_truthy(defines, name),
                })
                .ok_or_else(|| format!("line {line_number}: #{keyword} requires an argument"))
        };

        match keyword {
            "ifdef" | "ifndef" | "if" => {
                let condition = condition(keyword)?;
                blocks.push(Block {
                    parent_active: active,
                    condition,
                    in_else: false,
                });
            }
            "else" => match blocks.last_mut() {
                Some(block) if !block.in_else => block.in_else = true,
                Some(_) => return Err(format!("line {line_number}: duplicate #else")),
                None => return Err(format!("line {line_number}: #else without #if")),
            },
            "endif" => {
                if blocks.pop().is_none() {
                    return Err(format!("line {line_number}: #endif without #if"));
                }
            }
            _ => return Err(format!("line {line_number}: unknown directive #{keyword}")),
        }

        output.push('\n');
    }

    if !blocks.is_empty() {
        return Err(format!("{} unterminated #if block(s)", blocks.len()));
    }

    Ok(output)
}

/// Appends a module-scope `const` for every define that has a value.
pub(crate) fn declare_defines(defines: &DefineList, output: &mut String) {
    for (name, value) in defines.iter() {
        if !value.trim().is_empty() {
            // Infallible for String.
            let _ = writeln!(output, "const {name} = {value};");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(pairs: &[(&str, &str)]) -> DefineList {
        pairs.iter().copied().collect()
    }

    #[test]
    fn selects_branches_and_keeps_line_numbers() {
        let source = "a\n#ifdef FOO\nb\n#else\nc\n#endif\nd\n";

        let with = preprocess(source, &defines(&[("FOO", "")])).unwrap();
        assert_eq!(with, "a\n\nb\n\n\n\nd\n");

        let without = preprocess(source, &DefineList::new()).unwrap();
        assert_eq!(without, "a\n\n\n\nc\n\nd\n");
    }

    #[test]
    fn if_uses_define_values() {
        let source = "#if MODE\nyes\n#endif\n#ifndef MODE\nundefined\n#endif\n";

        assert_eq!(
            preprocess(source, &defines(&[("MODE", "0")])).unwrap(),
            "\n\n\n\n\n\n"
        );
        assert_eq!(
            preprocess(source, &defines(&[("MODE", "2")])).unwrap(),
            "\nyes\n\n\n\n\n"
        );
    }

    #[test]
    fn valued_defines_become_constants() {
        let mut output = String::new();
        declare_defines(&defines(&[("COUNT", "4u"), ("FLAG", "")]), &mut output);
        assert_eq!(output, "const COUNT = 4u;\n");
    }

    #[test]
    fn nested_blocks_inherit_inactivity() {
        let source = "#ifdef A\n#ifdef B\nx\n#else\ny\n#endif\n#endif\n";
        let output = preprocess(source, &defines(&[("B", "")])).unwrap();

        assert!(!output.contains('x'));
        assert!(!output.contains('y'), "the outer block is inactive");
    }

    #[test]
    fn malformed_directives_are_errors() {
        assert!(preprocess("#endif\n", &DefineList::new()).is_err());
        assert!(preprocess("#ifdef A\n", &DefineList::new()).is_err());
        assert!(preprocess("#ifdef A\n#else\n#else\n#endif\n", &DefineList::new()).is_err());
        assert!(preprocess("#include \"x\"\n", &DefineList::new()).is_err());
    }
}
