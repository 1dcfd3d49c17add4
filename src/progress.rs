/// Where loading progress is reported. The DOM overlay implements this; tests
/// record calls.
pub trait ProgressSink {
    fn set_percent(&mut self, percent: f32);
    fn complete(&mut self);
    fn fail(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Idle,
    Loading,
    Complete,
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Idle => "idle",
            LoadStatus::Loading => "loading",
            LoadStatus::Complete => "complete",
            LoadStatus::Failed => "failed",
        }
    }
}

/// Counts started and finished asset requests. Progress is reported per
/// finished item as `loaded / total * 100`; once every item has finished the
/// sink is told to complete, or to fail if any item errored.
#[derive(Debug, Clone)]
pub struct LoadProgress {
    total: usize,
    finished: usize,
    errors: Vec<String>,
    status: LoadStatus,
}

impl Default for LoadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProgress {
    pub fn new() -> Self {
        Self { total: 0, finished: 0, errors: Vec::new(), status: LoadStatus::Idle }
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.finished as f32 / self.total as f32 * 100.0
        }
    }

    pub fn item_started(&mut self) {
        self.total += 1;
        self.status = LoadStatus::Loading;
    }

    pub fn item_loaded(&mut self, sink: &mut impl ProgressSink) {
        self.item_finished(sink);
    }

    pub fn item_failed(&mut self, message: String, sink: &mut impl ProgressSink) {
        log::error!("{}", message);
        self.errors.push(message);
        self.item_finished(sink);
    }

    fn item_finished(&mut self, sink: &mut impl ProgressSink) {
        if self.status != LoadStatus::Loading {
            log::warn!("Ignoring load completion outside of an active load");
            return;
        }
        self.finished = (self.finished + 1).min(self.total);
        sink.set_percent(self.percent());

        if self.finished == self.total {
            if self.errors.is_empty() {
                self.status = LoadStatus::Complete;
                sink.complete();
            } else {
                self.status = LoadStatus::Failed;
                sink.fail(&self.errors.join("; "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        percents: Vec<f32>,
        completed: usize,
        failure: Option<String>,
    }

    impl ProgressSink for Recorder {
        fn set_percent(&mut self, percent: f32) {
            self.percents.push(percent);
        }
        fn complete(&mut self) {
            self.completed += 1;
        }
        fn fail(&mut self, message: &str) {
            self.failure = Some(message.to_string());
        }
    }

    #[test]
    fn reports_per_item_progress_then_completes() {
        let mut sink = Recorder::default();
        let mut progress = LoadProgress::new();
        progress.item_started();
        progress.item_started();
        assert_eq!(progress.status(), LoadStatus::Loading);

        progress.item_loaded(&mut sink);
        assert_eq!(sink.completed, 0);
        progress.item_loaded(&mut sink);

        assert_eq!(sink.percents, vec![50.0, 100.0]);
        assert_eq!(sink.completed, 1);
        assert_eq!(progress.status(), LoadStatus::Complete);
    }

    #[test]
    fn failure_is_reported_instead_of_completion() {
        let mut sink = Recorder::default();
        let mut progress = LoadProgress::new();
        progress.item_started();
        progress.item_started();

        progress.item_failed("HTTP 404 while fetching /midday_1k.hdr".into(), &mut sink);
        progress.item_loaded(&mut sink);

        assert_eq!(sink.completed, 0);
        assert_eq!(sink.failure.as_deref(), Some("HTTP 404 while fetching /midday_1k.hdr"));
        assert_eq!(progress.status(), LoadStatus::Failed);
        assert_eq!(progress.errors().len(), 1);
    }

    #[test]
    fn stray_completion_is_ignored() {
        let mut sink = Recorder::default();
        let mut progress = LoadProgress::new();
        progress.item_loaded(&mut sink);
        assert!(sink.percents.is_empty());
        assert_eq!(progress.status(), LoadStatus::Idle);
        assert_eq!(progress.percent(), 0.0);
    }
}
