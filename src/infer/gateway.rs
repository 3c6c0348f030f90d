//! Inference gateway: the single entry point from the pipeline into the model.
//!
//! The gateway adds the batch dimension, runs the backend and checks that
//! the answer is a planar `(3, H, W)` / `(1, 3, H, W)` tensor. With a timeout
//! configured, the backend lives on its own thread and the gateway waits with
//! `recv_timeout`; a call that overruns drops the frame, and frames arriving
//! while that call is still running are dropped as busy rather than queued.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{PipelineError, PipelineErrorKind};
use crate::infer::backend::InferenceBackend;
use crate::tensor::Tensor;

pub struct InferenceGateway {
    name: &'static str,
    mode: GatewayMode,
}

enum GatewayMode {
    Inline(Box<dyn InferenceBackend>),
    Bounded(BoundedWorker),
}

impl InferenceGateway {
    /// Run the backend on the calling thread. Calls block until the model answers.
    pub fn new<B: InferenceBackend + 'static>(backend: B) -> Self {
        Self {
            name: backend.name(),
            mode: GatewayMode::Inline(Box::new(backend)),
        }
    }

    /// Run the backend on a dedicated thread and bound every call by `timeout`.
    pub fn with_timeout<B: InferenceBackend + 'static>(backend: B, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(anyhow!("inference timeout must be greater than zero"));
        }
        let name = backend.name();
        Ok(Self {
            name,
            mode: GatewayMode::Bounded(BoundedWorker::spawn(Box::new(backend), timeout)?),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        match &self.mode {
            GatewayMode::Inline(_) => None,
            GatewayMode::Bounded(worker) => Some(worker.timeout),
        }
    }

    /// Warm up the backend. Only possible before the first bounded call.
    pub fn warm_up(&mut self) -> Result<()> {
        match &mut self.mode {
            GatewayMode::Inline(backend) => backend.warm_up(),
            GatewayMode::Bounded(worker) => worker.call(Job::WarmUp).map(|_| ()),
        }
    }

    /// Run inference on a `(3, H, W)` or `(1, 3, H, W)` tensor.
    pub fn run(&mut self, input: Tensor) -> Result<Tensor> {
        let input = input.with_batch()?;
        let output = match &mut self.mode {
            GatewayMode::Inline(backend) => backend
                .infer(&input)
                .map_err(|e| inference_failure(format!("{} backend: {:#}", self.name, e)))?,
            GatewayMode::Bounded(worker) => worker
                .call(Job::Infer(input))?
                .ok_or_else(|| inference_failure("worker returned no tensor"))?,
        };
        output.planar_dims()?;
        Ok(output)
    }
}

fn inference_failure(message: impl Into<String>) -> anyhow::Error {
    PipelineError::new(PipelineErrorKind::InferenceFailure, message).into()
}

enum Job {
    Infer(Tensor),
    WarmUp,
}

type Reply = std::result::Result<Option<Tensor>, String>;

struct BoundedWorker {
    jobs: Option<Sender<Job>>,
    replies: Receiver<Reply>,
    timeout: Duration,
    in_flight: bool,
    join: Option<JoinHandle<()>>,
}

impl BoundedWorker {
    fn spawn(mut backend: Box<dyn InferenceBackend>, timeout: Duration) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
        let name = backend.name();
        let join = std::thread::Builder::new()
            .name(format!("infer-{}", name))
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let reply = match job {
                        Job::Infer(input) => backend.infer(&input).map(Some),
                        Job::WarmUp => backend.warm_up().map(|_| None),
                    };
                    if reply_tx.send(reply.map_err(|e| format!("{:#}", e))).is_err() {
                        break;
                    }
                }
                log::debug!("inference worker {} stopped", name);
            })?;
        Ok(Self {
            jobs: Some(job_tx),
            replies: reply_rx,
            timeout,
            in_flight: false,
            join: Some(join),
        })
    }

    fn call(&mut self, job: Job) -> Result<Option<Tensor>> {
        if self.in_flight {
            match self.replies.try_recv() {
                Ok(_) => {
                    log::debug!("discarding late inference result");
                    self.in_flight = false;
                }
                Err(TryRecvError::Empty) => {
                    return Err(PipelineError::new(
                        PipelineErrorKind::InferenceBusy,
                        "previous inference call has not finished",
                    )
                    .into());
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(inference_failure("inference worker exited"));
                }
            }
        }

        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| inference_failure("inference worker is shut down"))?;
        jobs.send(job)
            .map_err(|_| inference_failure("inference worker exited"))?;

        match self.replies.recv_timeout(self.timeout) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(message)) => Err(inference_failure(message)),
            Err(RecvTimeoutError::Timeout) => {
                self.in_flight = true;
                Err(PipelineError::new(
                    PipelineErrorKind::InferenceTimeout,
                    format!("no answer within {} ms", self.timeout.as_millis()),
                )
                .into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(inference_failure("inference worker exited")),
        }
    }
}

impl Drop for BoundedWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop. A worker stuck in a
        // hung call is left detached instead of blocking shutdown.
        self.jobs.take();
        if let Some(join) = self.join.take() {
            if !self.in_flight {
                let _ = join.join();
            }
        }
    }
}
