use crate::classifier::{Classifier, InferenceFault, ProbabilityVector};
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use ndarray::Array4;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

const SLOT_QUEUE_DEPTH: usize = 32;

struct InferenceJob {
    input: Array4<f32>,
    reply: Sender<Result<ProbabilityVector>>,
}

/// Single execution slot owning the classifier on a dedicated thread.
///
/// ONNX sessions need `&mut` to run, so calls are serialized through a bounded
/// queue rather than shared behind a lock. Cloning the slot clones the sender;
/// the worker exits once every clone is dropped.
#[derive(Clone)]
pub struct InferenceSlot {
    tx: Sender<InferenceJob>,
}

impl InferenceSlot {
    /// Starts the worker and runs `load` on it. A failed or panicking loader
    /// leaves the slot answering every request with `ModelUnavailable`.
    pub fn spawn<F>(load: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn Classifier>> + Send + 'static,
    {
        let (tx, rx) = bounded::<InferenceJob>(SLOT_QUEUE_DEPTH);
        thread::Builder::new()
            .name("inference-slot".into())
            .spawn(move || run_slot(load, rx))?;
        Ok(Self { tx })
    }

    /// A slot with no model behind it.
    pub fn unavailable(reason: impl Into<String>) -> Result<Self> {
        let reason = reason.into();
        Self::spawn(move || Err(Error::ModelUnavailable(reason)))
    }

    /// Blocks until the worker has run this input.
    pub fn classify(&self, input: Array4<f32>) -> Result<ProbabilityVector> {
        let (reply, response) = bounded(1);
        self.tx
            .send(InferenceJob { input, reply })
            .map_err(|_| Error::ModelUnavailable("inference slot has shut down".into()))?;
        response
            .recv()
            .map_err(|_| Error::ModelUnavailable("inference slot dropped the request".into()))?
    }
}

fn run_slot<F>(load: F, rx: Receiver<InferenceJob>)
where
    F: FnOnce() -> Result<Box<dyn Classifier>>,
{
    let loaded = match catch_unwind(AssertUnwindSafe(load)) {
        Ok(Ok(classifier)) => Ok(classifier),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("classifier panicked while loading".to_string()),
    };

    match loaded {
        Ok(mut classifier) => {
            log::info!("Inference slot ready");
            for job in rx.iter() {
                let result = safe_classify(classifier.as_mut(), &job.input);
                if let Err(err) = &result {
                    log::error!("Inference failed: {err}");
                }
                let _ = job.reply.send(result);
            }
        }
        Err(reason) => {
            log::error!("Classifier failed to initialize: {reason}");
            for job in rx.iter() {
                let _ = job.reply.send(Err(Error::ModelUnavailable(reason.clone())));
            }
        }
    }
    log::debug!("Inference slot shutting down");
}

fn safe_classify(
    classifier: &mut dyn Classifier,
    input: &Array4<f32>,
) -> Result<ProbabilityVector> {
    match catch_unwind(AssertUnwindSafe(|| classifier.classify(input))) {
        Ok(res) => res,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::inference(
                "classifier panicked",
                InferenceFault::Panicked(detail),
            ))
        }
    }
}
