use crate::events::EngineEvent;

#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

pub trait Logger: Send + Sync {
    fn log(&self, log_level: LogLevel, event: EngineEvent);
    fn clone_dyn(&self) -> Box<dyn Logger>;
}

impl Clone for Box<dyn Logger> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

/// Backs `Logger` with `tracing` macros, one line per event the way every
/// component in this crate emits them (state-machine transition, dropped
/// dependency, wave start/end).
#[derive(Clone, Default)]
pub struct StdIoLogger {}

impl StdIoLogger {
    pub fn new() -> StdIoLogger {
        StdIoLogger {}
    }
}

impl Logger for StdIoLogger {
    fn log(&self, log_level: LogLevel, event: EngineEvent) {
        match log_level {
            LogLevel::Debug => debug!("{} {}", event.details(), event.message()),
            LogLevel::Info => info!("{} {}", event.details(), event.message()),
            LogLevel::Warning => warn!("{} {}", event.details(), event.message()),
            LogLevel::Error => error!("{} {}", event.details(), event.message()),
        }
    }

    fn clone_dyn(&self) -> Box<dyn Logger> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDetails, Stage};
    use tracing_test::traced_test;
    use uuid::Uuid;

    #[test]
    #[traced_test]
    fn std_io_logger_emits_details_and_message() {
        let logger = StdIoLogger::new();
        let details = EventDetails::new(Uuid::nil(), Uuid::nil(), "my-service", Stage::Deploy);
        logger.log(LogLevel::Info, EngineEvent::Info(details, "wave 0 started".to_string()));

        assert!(logs_contain("my-service"));
        assert!(logs_contain("wave 0 started"));
    }
}
