use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::{Id, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Tracks the in-flight queries of one phase.
///
/// Futures run on the reactor as independent tasks; the solver maps each
/// finished task back to the index of the work item that spawned it.
pub struct Solver<T> {
	tasks: JoinSet<T>,
	active: HashMap<Id, usize>,
}

impl<T: Send + 'static> Solver<T> {
	pub fn new() -> Self {
		Self {
			tasks: JoinSet::new(),
			active: HashMap::new(),
		}
	}

	pub fn add_request<F>(&mut self, index: usize, request: F)
	where
		F: Future<Output = T> + Send + 'static,
	{
		let handle = self.tasks.spawn(request);
		self.active.insert(handle.id(), index);
	}

	pub fn outstanding(&self) -> usize {
		self.tasks.len()
	}

	/// Wait for one request to reach a terminal state.
	///
	/// Returns the work-item index and its outcome, or `None` when nothing
	/// is outstanding. A request whose task failed instead of completing
	/// yields an outcome of `None`; completions no longer present in the
	/// active table are skipped.
	pub async fn step(&mut self) -> Option<(usize, Option<T>)> {
		loop {
			match self.tasks.join_next_with_id().await? {
				Ok((id, outcome)) => match self.active.remove(&id) {
					Some(index) => return Some((index, Some(outcome))),
					None => debug!("ignoring completion of untracked request"),
				},
				Err(failure) => {
					warn!("query task failed: {failure}");
					if let Some(index) = self.active.remove(&failure.id()) {
						return Some((index, None));
					}
				}
			}
		}
	}
}

/// Submit one query per work item, evenly spreading submissions over
/// `budget`, and hand each item's outcome to `handle_result` as it
/// finishes.
///
/// The interval to the next submission is recomputed after every
/// submission from the remaining budget and the remaining work, so the
/// pacing adapts to drift. Once the deadline has passed, the remaining
/// submissions fire immediately. Submitted queries are never cancelled
/// here; the per-query timeout of the resolver runtime is the only
/// cancellation source, and the loop always drains every outstanding
/// query before returning.
pub async fn run_paced<W, T, F, Fut, S>(
	items: Vec<W>,
	budget: Duration,
	submit: F,
	mut handle_result: S,
) where
	F: Fn(&W) -> Fut,
	Fut: Future<Output = T> + Send + 'static,
	T: Send + 'static,
	S: FnMut(W, Option<T>),
{
	let total = items.len();
	if total == 0 {
		return;
	}
	let deadline = Instant::now() + budget;
	let mut work: Vec<Option<W>> = items.into_iter().map(Some).collect();
	let mut solver = Solver::new();
	let mut submitted = 0;
	let mut next_fire = Instant::now();
	while submitted < total || solver.outstanding() > 0 {
		tokio::select! {
			_ = sleep_until(next_fire), if submitted < total => {
				let item = work[submitted].as_ref().expect("unsubmitted item present");
				solver.add_request(submitted, submit(item));
				submitted += 1;
				next_fire = next_submission(deadline, total - submitted);
			}
			finished = solver.step(), if solver.outstanding() > 0 => {
				if let Some((index, outcome)) = finished {
					if let Some(item) = work[index].take() {
						handle_result(item, outcome);
					}
				}
			}
		}
	}
}

/// Time of the next submission: the remaining budget split evenly over the
/// remaining work, at microsecond resolution.
fn next_submission(deadline: Instant, remaining: usize) -> Instant {
	let now = Instant::now();
	if remaining == 0 {
		return now;
	}
	let left = deadline.duration_since(now);
	if left.is_zero() {
		return now;
	}
	now + Duration::from_micros((left.as_micros() / remaining as u128) as u64)
}

/// The slice of `total` owed to `part` out of `whole` units of work.
pub fn proportional_share(total: Duration, part: usize, whole: usize) -> Duration {
	if part == 0 || whole == 0 {
		return Duration::ZERO;
	}
	Duration::from_nanos((total.as_nanos() * part as u128 / whole as u128) as u64)
}
