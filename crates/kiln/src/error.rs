#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A graphics API call failed. These are not recoverable.
    #[error("{call} failed: {source}")]
    Gfx {
        call: &'static str,
        #[source]
        source: kiln_gfx::Error,
    },
    #[error("the query heap has no free queries")]
    QueryHeapExhausted,
    #[error("failed to compile program '{name}':\n{log}")]
    ProgramCompilation { name: String, log: String },
    #[error("Shader compilation failed for '{entry_point}'.\n{diagnostics}")]
    ShaderCodeGeneration {
        entry_point: String,
        diagnostics: String,
    },
    #[error("the owning device was destroyed")]
    DeviceDestroyed,
    #[error("{0}")]
    InvalidUsage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches the name of the failing call to graphics API errors.
pub(crate) trait GfxResultExt<T> {
    fn gfx_call(self, call: &'static str) -> Result<T>;
}

impl<T> GfxResultExt<T> for kiln_gfx::Result<T> {
    fn gfx_call(self, call: &'static str) -> Result<T> {
        self.map_err(|source| Error::Gfx { call, source })
    }
}
