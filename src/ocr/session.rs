use super::{EngineFactory, OcrEngine, OcrOutput, PageSegMode};
use crate::error::OcrError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Owns the single OCR engine for the process and funnels every recognition
/// through it.
///
/// The engine is created on first use. `engine` is guarded by an async mutex,
/// so one initialization runs at a time and every concurrent caller waits for
/// it instead of starting its own. `queue` is a second (FIFO) mutex held for
/// the duration of a recognition so calls reach the engine one by one.
pub struct OcrSession {
    factory: Arc<dyn EngineFactory>,
    engine: Mutex<Option<Arc<dyn OcrEngine>>>,
    queue: Mutex<()>,
}

impl OcrSession {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            engine: Mutex::new(None),
            queue: Mutex::new(()),
        }
    }

    /// The live engine, creating it if there is none.
    pub async fn engine(&self) -> Result<Arc<dyn OcrEngine>, OcrError> {
        let mut slot = self.engine.lock().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }
        info!("Initializing OCR engine");
        let engine = self.factory.create().await?;
        info!(engine = engine.name(), "OCR engine ready");
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Recognize one image. A transient engine fault recreates the engine and
    /// retries exactly once.
    pub async fn recognize(&self, image: &Path, mode: PageSegMode) -> Result<OcrOutput, OcrError> {
        let _turn = self.queue.lock().await;

        let engine = self.engine().await?;
        match engine.recognize(image, mode).await {
            Err(e) if e.is_transient() => {
                warn!(error = %e, psm = mode.psm(), "Transient OCR fault, recreating engine and retrying");
                self.discard(&engine).await;
                let engine = self.engine().await?;
                engine.recognize(image, mode).await
            }
            other => other,
        }
    }

    /// Drop the engine if it is still the current one.
    async fn discard(&self, failed: &Arc<dyn OcrEngine>) {
        let mut slot = self.engine.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, failed)) {
            if let Some(engine) = slot.take() {
                engine.terminate().await;
            }
        }
    }

    /// Tear the engine down. A later call starts a fresh one.
    pub async fn shutdown(&self) {
        let _turn = self.queue.lock().await;
        let mut slot = self.engine.lock().await;
        if let Some(engine) = slot.take() {
            info!(engine = engine.name(), "Shutting down OCR engine");
            engine.terminate().await;
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.engine.lock().await.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted engine: each mode maps to a result; `transient_failures`
    /// makes the next N calls fail transiently, across engine instances.
    pub(crate) struct ScriptedFactory {
        pub created: AtomicUsize,
        pub terminated: Arc<AtomicUsize>,
        pub calls: Arc<AtomicUsize>,
        pub results: HashMap<u8, Result<(String, f64), String>>,
        pub transient_failures: Arc<AtomicUsize>,
        pub init_delay: Duration,
    }

    impl ScriptedFactory {
        pub(crate) fn new(results: HashMap<u8, Result<(String, f64), String>>) -> Self {
            Self {
                created: AtomicUsize::new(0),
                terminated: Arc::new(AtomicUsize::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
                results,
                transient_failures: Arc::new(AtomicUsize::new(0)),
                init_delay: Duration::ZERO,
            }
        }
    }

    struct ScriptedEngine {
        results: HashMap<u8, Result<(String, f64), String>>,
        failures_left: Arc<AtomicUsize>,
        terminated: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(&self, _image: &Path, mode: PageSegMode) -> Result<OcrOutput, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(OcrError::Transient("state corrupted".to_string()));
            }
            match self.results.get(&mode.psm()) {
                Some(Ok((text, confidence))) => Ok(OcrOutput {
                    text: text.clone(),
                    confidence: *confidence,
                    ..Default::default()
                }),
                Some(Err(msg)) => Err(OcrError::Failed(msg.clone())),
                None => Ok(OcrOutput::default()),
            }
        }

        async fn terminate(&self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EngineFactory for ScriptedFactory {
        async fn create(&self) -> Result<Arc<dyn OcrEngine>, OcrError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if !self.init_delay.is_zero() {
                tokio::time::sleep(self.init_delay).await;
            }
            Ok(Arc::new(ScriptedEngine {
                results: self.results.clone(),
                failures_left: Arc::clone(&self.transient_failures),
                terminated: Arc::clone(&self.terminated),
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    pub(crate) fn results(entries: &[(u8, &str, f64)]) -> HashMap<u8, Result<(String, f64), String>> {
        entries
            .iter()
            .map(|(psm, text, conf)| (*psm, Ok((text.to_string(), *conf))))
            .collect()
    }

    #[tokio::test]
    async fn test_lazy_single_initialization() {
        let factory = Arc::new(ScriptedFactory::new(results(&[(6, "hello", 90.0)])));
        let session = OcrSession::new(factory.clone());
        assert!(!session.is_initialized().await);

        for _ in 0..3 {
            let out = session.recognize(Path::new("x.png"), PageSegMode::SingleBlock).await.unwrap();
            assert_eq!(out.text, "hello");
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(session.is_initialized().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_initialization() {
        let mut factory = ScriptedFactory::new(results(&[(6, "x", 50.0)]));
        factory.init_delay = Duration::from_millis(50);
        let factory = Arc::new(factory);
        let session = Arc::new(OcrSession::new(factory.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.engine().await.map(|_| ()) })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_recreates_and_retries_once() {
        let factory = Arc::new(ScriptedFactory::new(results(&[(3, "recovered", 80.0)])));
        factory.transient_failures.store(1, Ordering::SeqCst);
        let session = OcrSession::new(factory.clone());

        let out = session.recognize(Path::new("x.png"), PageSegMode::Auto).await.unwrap();
        assert_eq!(out.text, "recovered");
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_transient_failure_surfaces() {
        let factory = Arc::new(ScriptedFactory::new(results(&[(3, "never", 80.0)])));
        factory.transient_failures.store(5, Ordering::SeqCst);
        let session = OcrSession::new(factory.clone());

        let err = session.recognize(Path::new("x.png"), PageSegMode::Auto).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_transient_failure_not_retried() {
        let mut map = HashMap::new();
        map.insert(6u8, Err("bad image".to_string()));
        let factory = Arc::new(ScriptedFactory::new(map));
        let session = OcrSession::new(factory.clone());

        let err = session.recognize(Path::new("x.png"), PageSegMode::SingleBlock).await.unwrap_err();
        assert!(matches!(err, OcrError::Failed(_)));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_terminates_engine() {
        let factory = Arc::new(ScriptedFactory::new(results(&[(6, "a", 10.0)])));
        let session = OcrSession::new(factory.clone());
        session.engine().await.unwrap();
        session.shutdown().await;
        assert!(!session.is_initialized().await);
        assert_eq!(factory.terminated.load(Ordering::SeqCst), 1);
    }
}
