//! executor.rs - Runs privileged operations on a dedicated background thread.
//!
//! The owning thread sends `OperationJob`s and receives `OperationReport`s
//! back over channels. Only the owning thread mutates the app catalog, so
//! the broker itself never touches UI-side state.

use crate::broker::PackageBroker;
use crate::types::{OperationOutcome, OperationRequest};
use log::{debug, error};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

/// Unique identifier for each job/report pair.
pub type JobId = u64;

/// A request to run one operation.
#[derive(Debug)]
pub struct OperationJob {
    pub id: JobId,
    pub request: OperationRequest,
}

/// The result of one job.
#[derive(Debug)]
pub struct OperationReport {
    pub id: JobId,
    pub request: OperationRequest,
    pub outcome: OperationOutcome,
}

/// Spawns a dedicated thread that executes jobs in arrival order.
///
/// The thread exits when `job_rx` is closed or the report receiver is dropped.
pub fn spawn_executor_thread(
    broker: Arc<PackageBroker>,
    job_rx: Receiver<OperationJob>,
    report_tx: Sender<OperationReport>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        debug!("Operation executor thread started.");
        while let Ok(job) = job_rx.recv() {
            debug!("Executing job {}: {}", job.id, job.request);
            let outcome = broker.execute(&job.request);

            let report = OperationReport {
                id: job.id,
                request: job.request,
                outcome,
            };
            if report_tx.send(report).is_err() {
                error!("Failed to send operation report. Receiver probably dropped.");
                break;
            }
        }
        debug!("Operation executor thread shut down.");
    })
}

/// Owning-thread side of the executor.
pub struct Executor {
    job_tx: Sender<OperationJob>,
    report_rx: Receiver<OperationReport>,
    next_id: JobId,
    worker: Option<JoinHandle<()>>,
}

impl Executor {
    pub fn spawn(broker: Arc<PackageBroker>) -> Self {
        let (job_tx, job_rx) = mpsc::channel();
        let (report_tx, report_rx) = mpsc::channel();
        let worker = spawn_executor_thread(broker, job_rx, report_tx);
        Self {
            job_tx,
            report_rx,
            next_id: 1,
            worker: Some(worker),
        }
    }

    /// Queue a request; returns its job id, or `None` if the worker is gone.
    pub fn submit(&mut self, request: OperationRequest) -> Option<JobId> {
        let id = self.next_id;
        self.next_id += 1;
        match self.job_tx.send(OperationJob { id, request }) {
            Ok(()) => Some(id),
            Err(e) => {
                error!("Executor thread is gone, dropping {}", e.0.request);
                None
            }
        }
    }

    /// Block until the next report arrives.
    pub fn recv(&self) -> Option<OperationReport> {
        self.report_rx.recv().ok()
    }

    /// Run `requests` strictly one after another.
    ///
    /// Each request is submitted only after the previous report arrived, and
    /// `on_report` sees every report before the next job starts.
    pub fn run_sequential<F>(&mut self, requests: Vec<OperationRequest>, mut on_report: F)
    where
        F: FnMut(&OperationReport),
    {
        for request in requests {
            if self.submit(request).is_none() {
                break;
            }
            match self.recv() {
                Some(report) => on_report(&report),
                None => break,
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Closing the job channel stops the worker loop
        let (closed_tx, _) = mpsc::channel();
        self.job_tx = closed_tx;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Operation executor thread panicked.");
            }
        }
    }
}
