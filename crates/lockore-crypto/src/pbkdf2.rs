//! PBKDF2-HMAC-SHA1 with cooperative cancellation and progress reporting.
//!
//! Output is two SHA-1 blocks (40 bytes). Both blocks advance together so a
//! single iteration counter describes progress.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zeroize::Zeroize;

use lockore_core::config::KdfConfig;
use lockore_core::{BackgroundTask, CancelToken, LockoreError, LockoreResult};

use crate::hash::Sha1;
use crate::hmac::Hmac;
use crate::scrub::scrub;

pub const HASH_LEN: usize = Sha1::OUTPUT_LEN;
pub const DERIVED_LEN: usize = 2 * HASH_LEN;

/// Slice length used while waiting out the minimum duration.
const FLOOR_POLL: Duration = Duration::from_millis(20);

/// 40-byte PBKDF2 output. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; DERIVED_LEN],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; DERIVED_LEN] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug)]
pub enum Pbkdf2Outcome {
    Derived(DerivedKey),
    Canceled,
}

impl Pbkdf2Outcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    pub fn into_key(self) -> Option<DerivedKey> {
        match self {
            Self::Derived(key) => Some(key),
            Self::Canceled => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pbkdf2Params {
    pub iterations: u32,
    /// The derivation never returns sooner than this.
    pub min_duration: Duration,
    /// Iterations between progress reports are kept within these bounds.
    pub min_report: u32,
    pub max_report: u32,
}

impl Pbkdf2Params {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations,
            ..Self::default()
        }
    }

    pub fn from_config(config: &KdfConfig, iterations: u32) -> Self {
        Self {
            iterations,
            min_duration: Duration::from_millis(config.min_duration_ms),
            min_report: config.min_report_iterations.max(1),
            max_report: config.max_report_iterations.max(1),
        }
    }

    /// No time floor; used by tests and batch tools.
    pub fn without_floor(mut self) -> Self {
        self.min_duration = Duration::ZERO;
        self
    }

    fn report_step(&self, throughput: f64) -> u32 {
        let lo = self.min_report.max(1);
        let hi = self.max_report.max(lo);
        ((throughput / 2.0) as u32).clamp(lo, hi)
    }
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self::from_config(&KdfConfig::default(), KdfConfig::default().iterations)
    }
}

/// Progress snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pbkdf2Progress {
    pub done: u32,
    pub total: u32,
    pub elapsed: Duration,
    /// Estimated time left, once at least one batch has completed.
    pub remaining: Option<Duration>,
}

impl Pbkdf2Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.done as f64 / self.total as f64
    }
}

/// Blend of elapsed-time extrapolation and the throughput estimate.
fn estimate_remaining(done: u32, total: u32, elapsed: Duration, throughput: f64) -> Option<Duration> {
    if done == 0 {
        return None;
    }
    let left = total.saturating_sub(done) as f64;
    let by_elapsed = elapsed.as_secs_f64() * left / done as f64;
    let secs = if throughput > 0.0 {
        (by_elapsed + left / throughput) / 2.0
    } else {
        by_elapsed
    };
    Some(Duration::from_secs_f64(secs.max(0.0)))
}

/// HMAC-SHA1 iterations per second on this host, measured over `sample` runs.
pub fn measure_throughput(sample: u32) -> f64 {
    let sample = sample.max(1);
    let mut mac = Hmac::new(Sha1::new(), b"throughput probe");
    let mut u = [0u8; HASH_LEN];
    let mut next = [0u8; HASH_LEN];
    let started = Instant::now();
    for _ in 0..sample {
        mac.mac(&u, &mut next);
        u = next;
    }
    let secs = started.elapsed().as_secs_f64().max(1e-9);
    sample as f64 / secs
}

/// Derive 40 bytes from `password` and `salt`.
///
/// Returns `Canceled` as soon as `cancel` is observed between batches.
/// Every intermediate buffer is scrubbed on every exit path.
pub fn derive(
    password: &[u8],
    salt: &[u8],
    params: &Pbkdf2Params,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(&Pbkdf2Progress),
) -> LockoreResult<Pbkdf2Outcome> {
    if params.iterations == 0 {
        return Err(LockoreError::InvalidArgument(
            "pbkdf2 iteration count must be positive".into(),
        ));
    }

    let started = Instant::now();
    let mut mac = Hmac::new(Sha1::new(), password);
    let mut u = [[0u8; HASH_LEN]; 2];
    let mut t = [[0u8; HASH_LEN]; 2];
    let mut next = [0u8; HASH_LEN];

    // U1 = HMAC(P, S || INT(i))
    for (block, (u_i, t_i)) in u.iter_mut().zip(t.iter_mut()).enumerate() {
        mac.update(salt);
        mac.update(&(block as u32 + 1).to_be_bytes());
        mac.finalize_into(u_i);
        *t_i = *u_i;
    }

    let total = params.iterations;
    let mut done = 1u32;
    let mut step = params.min_report.max(1);
    let mut throughput = 0.0f64;
    let mut canceled = false;

    while done < total {
        if cancel.is_cancelled() {
            canceled = true;
            break;
        }
        let batch = step.min(total - done);
        for _ in 0..batch {
            for (u_i, t_i) in u.iter_mut().zip(t.iter_mut()) {
                mac.mac(u_i, &mut next);
                *u_i = next;
                for (acc, b) in t_i.iter_mut().zip(next.iter()) {
                    *acc ^= b;
                }
            }
        }
        done += batch;

        let elapsed = started.elapsed();
        throughput = done as f64 / elapsed.as_secs_f64().max(1e-9);
        step = params.report_step(throughput);
        progress(&Pbkdf2Progress {
            done,
            total,
            elapsed,
            remaining: estimate_remaining(done, total, elapsed, throughput),
        });
    }

    scrub(&mut next);
    for buf in u.iter_mut() {
        scrub(buf);
    }
    drop(mac);

    if !canceled {
        while started.elapsed() < params.min_duration {
            if cancel.is_cancelled() {
                canceled = true;
                break;
            }
            let left = params.min_duration - started.elapsed();
            std::thread::sleep(left.min(FLOOR_POLL));
        }
    }

    if canceled {
        for buf in t.iter_mut() {
            scrub(buf);
        }
        tracing::debug!(done, total, "pbkdf2 canceled");
        return Ok(Pbkdf2Outcome::Canceled);
    }

    let mut bytes = [0u8; DERIVED_LEN];
    bytes[..HASH_LEN].copy_from_slice(&t[0]);
    bytes[HASH_LEN..].copy_from_slice(&t[1]);
    for buf in t.iter_mut() {
        scrub(buf);
    }
    tracing::debug!(
        iterations = total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        throughput = throughput as u64,
        "pbkdf2 derived"
    );
    Ok(Pbkdf2Outcome::Derived(DerivedKey { bytes }))
}

/// PBKDF2 running on a background thread.
///
/// The password is moved into the worker and scrubbed there on every exit.
pub struct Pbkdf2Worker {
    task: BackgroundTask<LockoreResult<Pbkdf2Outcome>>,
    progress: Arc<Mutex<Pbkdf2Progress>>,
}

impl Pbkdf2Worker {
    pub fn spawn(mut password: Vec<u8>, salt: Vec<u8>, params: Pbkdf2Params) -> LockoreResult<Self> {
        let progress = Arc::new(Mutex::new(Pbkdf2Progress {
            total: params.iterations,
            ..Default::default()
        }));
        let shared = Arc::clone(&progress);
        let task = BackgroundTask::spawn("lockore-pbkdf2", move |cancel| {
            let result = derive(&password, &salt, &params, &cancel, &mut |p| {
                *shared.lock() = p.clone();
            });
            scrub(&mut password);
            result
        })?;
        Ok(Self { task, progress })
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn progress(&self) -> Pbkdf2Progress {
        self.progress.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn join(self) -> LockoreResult<Pbkdf2Outcome> {
        self.task.join()?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(password: &[u8], salt: &[u8], iterations: u32) -> DerivedKey {
        let params = Pbkdf2Params::new(iterations).without_floor();
        derive(password, salt, &params, &CancelToken::new(), &mut |_| {})
            .unwrap()
            .into_key()
            .unwrap()
    }

    // RFC 6070 vectors; the first 20 bytes are the dkLen=20 output.
    #[test]
    fn test_rfc6070_one_iteration() {
        let key = run(b"password", b"salt", 1);
        assert_eq!(
            hex::encode(&key.as_bytes()[..20]),
            "0c60c80f961f0e71f3a9b524af6012062fe037a6"
        );
    }

    #[test]
    fn test_rfc6070_two_iterations() {
        let key = run(b"password", b"salt", 2);
        assert_eq!(
            hex::encode(&key.as_bytes()[..20]),
            "ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957"
        );
    }

    #[test]
    fn test_rfc6070_4096_iterations() {
        let key = run(b"password", b"salt", 4096);
        assert_eq!(
            hex::encode(&key.as_bytes()[..20]),
            "4b007901b765489abead49d926f721d065a429c1"
        );
    }

    #[test]
    fn test_rfc6070_second_block() {
        let key = run(
            b"passwordPASSWORDpassword",
            b"saltSALTsaltSALTsaltSALTsaltSALTsalt",
            4096,
        );
        assert_eq!(
            hex::encode(&key.as_bytes()[..25]),
            "3d2eec4fe41c849b80c8d83662c0e44a8b291a964cf2f07038"
        );
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let params = Pbkdf2Params::new(0);
        assert!(derive(b"p", b"s", &params, &CancelToken::new(), &mut |_| {}).is_err());
    }

    #[test]
    fn test_precancelled_returns_canceled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let params = Pbkdf2Params::new(10_000).without_floor();
        let outcome = derive(b"p", b"s", &params, &cancel, &mut |_| {}).unwrap();
        assert!(outcome.is_canceled());
    }

    #[test]
    fn test_cancel_from_progress_callback() {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let mut params = Pbkdf2Params::new(1_000_000).without_floor();
        params.min_report = 100;
        params.max_report = 100;
        let mut reports = 0;
        let outcome = derive(b"p", b"s", &params, &cancel, &mut |p| {
            reports += 1;
            assert!(p.done <= p.total);
            if p.done >= 500 {
                token.cancel();
            }
        })
        .unwrap();
        assert!(outcome.is_canceled());
        assert_eq!(reports, 5);
    }

    #[test]
    fn test_progress_reaches_total() {
        let mut params = Pbkdf2Params::new(1000).without_floor();
        params.min_report = 200;
        params.max_report = 200;
        let mut last = Pbkdf2Progress::default();
        derive(b"p@ss", b"salt", &params, &CancelToken::new(), &mut |p| {
            assert!(p.done > last.done);
            last = p.clone();
        })
        .unwrap();
        assert_eq!(last.done, 1000);
        assert_eq!(last.total, 1000);
        assert!(last.remaining.is_some());
        assert!((last.fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_min_duration_floor() {
        let mut params = Pbkdf2Params::new(2);
        params.min_duration = Duration::from_millis(60);
        let started = Instant::now();
        derive(b"p", b"s", &params, &CancelToken::new(), &mut |_| {}).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_report_step_bounds() {
        let params = Pbkdf2Params {
            iterations: 10,
            min_duration: Duration::ZERO,
            min_report: 200,
            max_report: 1000,
        };
        assert_eq!(params.report_step(10.0), 200);
        assert_eq!(params.report_step(1000.0), 500);
        assert_eq!(params.report_step(1e9), 1000);
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(0, 100, Duration::from_secs(1), 10.0), None);
        let eta = estimate_remaining(50, 100, Duration::from_secs(5), 10.0).unwrap();
        // elapsed says 5s, throughput says 5s
        assert!((eta.as_secs_f64() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_measure_throughput_positive() {
        assert!(measure_throughput(100) > 0.0);
    }

    #[test]
    fn test_worker_matches_inline() {
        let params = Pbkdf2Params::new(300).without_floor();
        let worker = Pbkdf2Worker::spawn(b"password".to_vec(), b"salt".to_vec(), params.clone())
            .unwrap();
        let from_worker = worker.join().unwrap().into_key().unwrap();
        let inline = run(b"password", b"salt", 300);
        assert_eq!(from_worker.as_bytes(), inline.as_bytes());
    }

    #[test]
    fn test_worker_cancel() {
        let mut params = Pbkdf2Params::new(u32::MAX).without_floor();
        params.max_report = 1000;
        let worker = Pbkdf2Worker::spawn(b"pw".to_vec(), b"salt".to_vec(), params).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        worker.cancel();
        let outcome = worker.join().unwrap();
        assert!(outcome.is_canceled());
    }
}
