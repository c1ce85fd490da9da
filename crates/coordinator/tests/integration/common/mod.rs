//! Common fixtures for coordinator integration tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autosave_coordinator::{
	AutosaveConfig, Coordinator, EntityId, FetchError, MemoryCache, Patch, ReadCache, ResourceKind, ViewFetcher, ViewKey, WriteExecutor,
	WriteFailure,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing_subscriber::fmt::MakeWriter;

/// One write as observed by [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub struct WriteLog {
	pub entity: EntityId,
	pub patch: Patch,
	pub started: Instant,
	pub settled: Option<Instant>,
	pub failed: bool,
}

/// Scripted reply for one write.
#[derive(Debug, Clone)]
pub struct Step {
	pub delay: Duration,
	pub failure: Option<WriteFailure>,
}

impl Step {
	pub fn ok(delay_ms: u64) -> Self {
		Self {
			delay: Duration::from_millis(delay_ms),
			failure: None,
		}
	}

	pub fn fail(delay_ms: u64, failure: WriteFailure) -> Self {
		Self {
			delay: Duration::from_millis(delay_ms),
			failure: Some(failure),
		}
	}
}

/// Executor that plays a script of replies, then falls back to a default.
///
/// Successful writes are applied to an in-memory server record whose
/// `revision` increments on every write.
pub struct ScriptedExecutor {
	fallback: Step,
	script: Mutex<VecDeque<Step>>,
	server: Mutex<HashMap<EntityId, Value>>,
	log: Mutex<Vec<WriteLog>>,
}

impl ScriptedExecutor {
	pub fn new(fallback: Step) -> Arc<Self> {
		Arc::new(Self {
			fallback,
			script: Mutex::new(VecDeque::new()),
			server: Mutex::new(HashMap::new()),
			log: Mutex::new(Vec::new()),
		})
	}

	pub fn push(&self, step: Step) {
		self.script.lock().push_back(step);
	}

	pub fn log(&self) -> Vec<WriteLog> {
		self.log.lock().clone()
	}

	pub fn server_record(&self, id: &str) -> Option<Value> {
		self.server.lock().get(&EntityId::from(id)).cloned()
	}

	/// Asserts that no two writes for the same entity overlapped in time.
	pub fn assert_single_flight(&self) {
		let mut by_entity: HashMap<EntityId, Vec<WriteLog>> = HashMap::new();
		for write in self.log() {
			by_entity.entry(write.entity.clone()).or_default().push(write);
		}
		for (entity, mut writes) in by_entity {
			writes.sort_by_key(|w| w.started);
			for pair in writes.windows(2) {
				let settled = pair[0].settled.expect("earlier write settled");
				assert!(
					pair[1].started >= settled,
					"writes for {entity} overlap: {:?} started before {:?} settled",
					pair[1].patch,
					pair[0].patch
				);
			}
		}
	}
}

#[async_trait]
impl WriteExecutor for ScriptedExecutor {
	async fn send(&self, entity: &EntityId, patch: &Patch) -> Result<Value, WriteFailure> {
		let step = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
		let index = {
			let mut log = self.log.lock();
			log.push(WriteLog {
				entity: entity.clone(),
				patch: patch.clone(),
				started: Instant::now(),
				settled: None,
				failed: step.failure.is_some(),
			});
			log.len() - 1
		};

		sleep(step.delay).await;
		self.log.lock()[index].settled = Some(Instant::now());

		if let Some(failure) = step.failure {
			return Err(failure);
		}
		let mut server = self.server.lock();
		let record = server.entry(entity.clone()).or_insert_with(|| order(entity.as_str()));
		patch.apply_to(record);
		let revision = record["revision"].as_u64().unwrap_or(0) + 1;
		record["revision"] = json!(revision);
		Ok(record.clone())
	}
}

/// Fetcher serving fixed values after a delay.
pub struct StaticFetcher {
	delay: Duration,
	values: Mutex<HashMap<ViewKey, Value>>,
	fetches: Mutex<Vec<ViewKey>>,
}

impl StaticFetcher {
	pub fn new(delay_ms: u64) -> Arc<Self> {
		Arc::new(Self {
			delay: Duration::from_millis(delay_ms),
			values: Mutex::new(HashMap::new()),
			fetches: Mutex::new(Vec::new()),
		})
	}

	pub fn set(&self, key: &str, value: Value) {
		self.values.lock().insert(ViewKey::from(key), value);
	}

	pub fn fetches(&self) -> Vec<ViewKey> {
		self.fetches.lock().clone()
	}
}

#[async_trait]
impl ViewFetcher for StaticFetcher {
	async fn fetch(&self, key: &ViewKey) -> Result<Value, FetchError> {
		self.fetches.lock().push(key.clone());
		sleep(self.delay).await;
		self.values.lock().get(key).cloned().ok_or_else(|| FetchError::NotFound(key.clone()))
	}
}

pub fn order(id: &str) -> Value {
	json!({ "id": id, "status": "draft", "notes": "", "revision": 0 })
}

pub fn order_kind() -> ResourceKind {
	ResourceKind::new("order").with_list("orders", "/items", "id").with_derived("orders/count")
}

/// Seeds order 1, the orders list and the derived count.
pub fn seed(cache: &MemoryCache) {
	cache.insert("order/1", order("1"));
	cache.insert(
		"orders",
		json!({ "items": [
			{ "id": "1", "status": "draft" },
			{ "id": "2", "status": "draft" }
		] }),
	);
	cache.insert("orders/count", json!(2));
}

pub struct Harness {
	pub cache: MemoryCache,
	pub executor: Arc<ScriptedExecutor>,
	pub coordinator: Coordinator<ResourceKind>,
}

impl Harness {
	pub fn new(config: &AutosaveConfig, fallback: Step) -> Self {
		Self::with_cache(MemoryCache::new(), config, fallback)
	}

	pub fn with_cache(cache: MemoryCache, config: &AutosaveConfig, fallback: Step) -> Self {
		seed(&cache);
		let executor = ScriptedExecutor::new(fallback);
		let coordinator = Coordinator::new(order_kind(), config, Arc::new(cache.clone()), executor.clone());
		Self {
			cache,
			executor,
			coordinator,
		}
	}

	pub fn view(&self, key: &str) -> Value {
		self.cache.get_view(&ViewKey::from(key)).expect("view cached")
	}

	pub fn bytes(&self, key: &str) -> Vec<u8> {
		serde_json::to_vec(&self.view(key)).expect("serializable view")
	}
}

/// Shared in-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
	pub fn contents(&self) -> String {
		String::from_utf8_lossy(&self.0.lock()).into_owned()
	}
}

impl io::Write for LogBuffer {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<'a> MakeWriter<'a> for LogBuffer {
	type Writer = LogBuffer;

	fn make_writer(&'a self) -> Self::Writer {
		self.clone()
	}
}

/// Captures events on the current thread until the guard drops.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
	let buffer = LogBuffer::default();
	let subscriber = tracing_subscriber::fmt()
		.with_max_level(tracing::Level::TRACE)
		.with_ansi(false)
		.with_writer(buffer.clone())
		.finish();
	(buffer, tracing::subscriber::set_default(subscriber))
}

/// Paused current-thread runtime for driving async code inside proptest cases.
pub fn paused_runtime() -> tokio::runtime::Runtime {
	tokio::runtime::Builder::new_current_thread()
		.enable_time()
		.start_paused(true)
		.build()
		.expect("failed to build runtime")
}
