// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Fans independent sessions out across worker threads. Sessions do not
//! coordinate with each other: one failing session leaves its peers
//! streaming, and no cross-session record ordering is implied. Handlers run
//! on the worker threads, so shared caller state must synchronize itself.

use log::*;

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::session::{ErrorHandler, RecordHandler, Session};
use crate::Error;

/// Everything one session needs to connect and subscribe.
#[derive(Clone)]
pub struct SessionConfig {
    pub key: String,
    pub dataset: String,
    pub send_ts_out: bool,
    pub schema: String,
    pub stype_in: String,
    /// Empty subscribes to the whole dataset.
    pub symbols: Vec<String>,
    pub suffix: String,
    pub replay: bool,
}

struct Worker {
    thread: JoinHandle<()>,
    /// Kept so close_all can force the worker's blocked receive to return.
    stream: Arc<TcpStream>,
}

pub struct SessionGroup {
    workers: Vec<Worker>,
    stop: Arc<AtomicBool>,
    num_subscribed: Arc<AtomicUsize>,
    num_sessions: usize,
}

impl SessionGroup {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            num_subscribed: Arc::new(AtomicUsize::new(0)),
            num_sessions: 0,
        }
    }

    /// Connects a new session on the calling thread (so authentication
    /// failures surface synchronously), then hands it to a worker that
    /// subscribes and drives the receive loop until the group stops or the
    /// session fails.
    pub fn connect_and_start<T: Send + 'static>(
        &mut self,
        config: SessionConfig,
        state: T,
        on_record: RecordHandler<T>,
        on_error: ErrorHandler<T>,
    ) -> Result<(), Error> {
        let mut session = Session::new(state, on_record, on_error);
        session.connect(&config.key, &config.dataset, config.send_ts_out)?;

        let stream = session
            .shutdown_handle()
            .expect("a connected session has a stream");

        let stop = self.stop.clone();
        let subscribed = self.num_subscribed.clone();
        let thread = std::thread::spawn(move || run_session(session, config, stop, subscribed));

        self.workers.push(Worker { thread, stream });
        self.num_sessions += 1;

        Ok(())
    }

    /// True once every session's worker has returned from its subscribe
    /// phase. Monotonic: stays true until [`close_all`](Self::close_all).
    pub fn is_fully_subscribed(&self) -> bool {
        self.num_subscribed.load(Ordering::Acquire) == self.num_sessions
    }

    pub fn num_sessions(&self) -> usize {
        self.num_sessions
    }

    /// Stops every worker and closes every session. Workers blocked in a
    /// receive are woken by shutting their sockets down; each observes the
    /// stop flag and exits without reporting the forced peer-close.
    pub fn close_all(&mut self) {
        self.stop.store(true, Ordering::Release);

        for worker in &self.workers {
            let _ = worker.stream.shutdown(Shutdown::Both);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.thread.join();
        }

        self.num_sessions = 0;
        self.num_subscribed.store(0, Ordering::Release);
    }
}

impl Default for SessionGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionGroup {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn run_session<T>(
    mut session: Session<T>,
    config: SessionConfig,
    stop: Arc<AtomicBool>,
    subscribed: Arc<AtomicUsize>,
) {
    let started = session.start(
        &config.schema,
        &config.stype_in,
        &config.symbols,
        &config.suffix,
        config.replay,
    );

    // The fully-subscribed barrier counts sessions whose subscribe phase is
    // over, successful or not; a failed session must not wedge it.
    subscribed.fetch_add(1, Ordering::AcqRel);

    if let Err(e) = started {
        if !stop.load(Ordering::Acquire) {
            warn!("[{}] session failed to start: {e}", config.dataset);
        }
        return;
    }

    while !stop.load(Ordering::Acquire) {
        if let Err(e) = session.get() {
            if !stop.load(Ordering::Acquire) {
                warn!("[{}] receive loop ended: {e}", config.dataset);
            }
            break;
        }
    }

    session.close();
}
