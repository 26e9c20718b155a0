use crate::player::track::Track;

/// Closed taxonomy of expected command failures. The message text doubles as
/// the user-facing reply, so keep it phrased for the person who typed the
/// command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureCause {
    #[error("this command only works inside a server")]
    MissingGuildContext,
    #[error("this command must be used from a text channel")]
    WrongChannelType,
    #[error("you must be in a voice channel to use this")]
    NotInVoiceChannel,
    #[error("no active voice session in this server")]
    NoActiveSession,
    #[error("already connected to a voice channel here")]
    AlreadyConnected,
    #[error("nothing is playing")]
    NothingPlaying,
    #[error("{0}")]
    InvalidTransition(String),
    #[error("could not join the voice channel: {0}")]
    ConnectFailed(String),
    #[error("timed out joining the voice channel")]
    ConnectTimeout,
    #[error("player fault: {0}")]
    Fatal(String),
}

/// Outcome of one command invocation. Expected failures travel here, never as
/// `Err` across the facade boundary.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub message: Option<String>,
    pub cause: Option<FailureCause>,
    pub track: Option<Track>,
    pub data: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            cause: None,
            track: None,
            data: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failure(cause: FailureCause) -> Self {
        Self {
            success: false,
            message: Some(cause.to_string()),
            cause: Some(cause),
            track: None,
            data: None,
        }
    }

    /// Failure with only a user-facing message, for refusals that are not part
    /// of the [`FailureCause`] taxonomy (bad input, resolver errors).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            cause: None,
            track: None,
            data: None,
        }
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.track = Some(track);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_failure(&self) -> bool {
        !self.success
    }
}

impl std::fmt::Display for CommandResult {
    /// Uniform user-facing rendering: message if present, else the attached
    /// track's display form, else empty.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(msg) = &self.message {
            write!(f, "{msg}")
        } else if let Some(track) = &self.track {
            write!(f, "{}", track.display())
        } else {
            Ok(())
        }
    }
}
