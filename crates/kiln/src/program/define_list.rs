use std::collections::BTreeMap;

/// An ordered set of preprocessor defines. Adding an existing name replaces
/// its value; removing a missing name does nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DefineList(BTreeMap<String, String>);

impl DefineList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.0.remove(name);
        self
    }

    pub fn add_list(&mut self, other: &DefineList) -> &mut Self {
        for (name, value) in other.iter() {
            self.add(name, value);
        }
        self
    }

    pub fn remove_list(&mut self, other: &DefineList) -> &mut Self {
        for (name, _) in other.iter() {
            self.remove(name);
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for DefineList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (name, value) in iter {
            list.add(name, value);
        }
        list
    }
}
