use crate::patch::PatchError;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("env file {path}: {detail}")]
    EnvFile { path: String, detail: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("config patch failed: {0}")]
    Patch(#[from] PatchError),

    #[error("signal setup failed: {0}")]
    Signal(std::io::Error),

    #[error("status error: {0}")]
    Status(String),

    #[error("agent not running: {0}")]
    NotRunning(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Process exit status reported to the container runtime.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Status(_) | Self::NotRunning(_) => 1,
            Self::EnvFile { .. } => 2,
            Self::Config(_) | Self::Patch(_) => 3,
            Self::Signal(_) => 4,
            Self::Io(_) => 5,
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failures_map_to_distinct_exit_codes() {
        let env = SupervisorError::EnvFile {
            path: "/etc/x".into(),
            detail: "line 1".into(),
        };
        let patch = SupervisorError::Patch(PatchError::NotAnObject);
        let signal = SupervisorError::Signal(std::io::Error::other("boom"));

        assert_eq!(env.exit_code(), 2);
        assert_eq!(patch.exit_code(), 3);
        assert_eq!(signal.exit_code(), 4);
        assert_eq!(SupervisorError::NotRunning("x".into()).exit_code(), 1);
    }

    #[test]
    fn patch_error_message_is_wrapped() {
        let err = SupervisorError::Patch(PatchError::NotAnObject);
        assert!(err.to_string().starts_with("config patch failed:"), "got: {err}");
    }
}
