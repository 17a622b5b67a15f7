use miette::Diagnostic;
use thiserror::Error;

use crate::{environment::EnvVarError, protocol::ParseHookTypeError};

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("could not resolve user home/config directory")]
    #[diagnostic(
        code(hookgate::config::paths),
        help("Set HOME, then retry `hookgate serve`.")
    )]
    HomeDirUnavailable,

    #[error("failed to load config")]
    #[diagnostic(
        code(hookgate::config::load),
        help("Fix the config file syntax or remove it to fall back to defaults.")
    )]
    ConfigLoad,

    #[error(transparent)]
    #[diagnostic(
        code(hookgate::hook::kind),
        help("Valid hook types are `pre-receive` and `post-receive`.")
    )]
    UnknownHookType(#[from] ParseHookTypeError),

    #[error("hook invocation environment is incomplete")]
    #[diagnostic(
        code(hookgate::hook::environment),
        help("The HOOKGATE_* variables are injected by the server; run this command from a VCS hook it launched.")
    )]
    Environment(#[from] EnvVarError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
