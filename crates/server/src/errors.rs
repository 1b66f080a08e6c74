use std::collections::VecDeque;

use wall::net::{RecordError, Severity};

pub const MAX_RECORDED_ERRORS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedError {
    pub received_at: f64,
    pub error: RecordError,
}

/// The most recent errors reported by display clients.
#[derive(Debug)]
pub struct ErrorLog {
    entries: VecDeque<LoggedError>,
    capacity: usize,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(MAX_RECORDED_ERRORS)
    }
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, received_at: f64, error: RecordError) {
        let origin = match (&error.client, &error.module) {
            (Some(client), Some(module)) => format!("{client}/{module}"),
            (Some(client), None) => client.clone(),
            (None, Some(module)) => module.clone(),
            (None, None) => "unknown".to_string(),
        };
        match error.severity {
            Severity::Debug => log::debug!("[{}] {}: {}", origin, error.namespace, error.message),
            Severity::Info => log::info!("[{}] {}: {}", origin, error.namespace, error.message),
            Severity::Warning => log::warn!("[{}] {}: {}", origin, error.namespace, error.message),
            Severity::Error => log::error!("[{}] {}: {}", origin, error.namespace, error.message),
        }
        if let Some(stack) = &error.stack {
            log::debug!("{}", stack);
        }

        self.entries.push_back(LoggedError { received_at, error });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn recent(&self) -> impl Iterator<Item = &LoggedError> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(message: &str) -> RecordError {
        RecordError {
            message: message.into(),
            stack: None,
            namespace: "player".into(),
            severity: Severity::Error,
            client: Some("0,0,10,10".into()),
            module: None,
        }
    }

    #[test]
    fn keeps_only_the_latest() {
        let mut log = ErrorLog::default();
        for i in 0..150 {
            log.record(i as f64, error(&format!("e{i}")));
        }
        assert_eq!(log.len(), MAX_RECORDED_ERRORS);
        assert_eq!(log.recent().next().map(|e| e.error.message.as_str()), Some("e50"));
    }
}
