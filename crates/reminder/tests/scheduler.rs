use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use tokio::sync::watch;
use uuid::Uuid;

use reminder::{
    BuildError, ChannelError, DeliveryError, DueHabit, MessageChannel, Outcome, ReminderStore,
    RetryPolicy, Scheduler, SkipReason, StoreError,
};

#[derive(Default)]
struct MockStore {
    habits: Vec<DueHabit>,
    chat_ids: HashMap<String, String>,
    fail_query: bool,
    queries: Arc<AtomicUsize>,
}

#[async_trait]
impl ReminderStore for MockStore {
    async fn habits_due_at(&self, _time: NaiveTime) -> Result<Vec<DueHabit>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_query {
            return Err(StoreError("connection lost".to_string()));
        }
        Ok(self.habits.clone())
    }

    async fn chat_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.chat_ids.get(user_id).cloned())
    }
}

#[derive(Clone, Copy)]
enum Script {
    Ok,
    TransientThenOk(u32),
    AlwaysTransient,
    Permanent,
    Panics,
}

struct MockChannel {
    scripts: HashMap<String, Script>,
    remaining: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockChannel {
    fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
        let scripts: HashMap<String, Script> = scripts
            .iter()
            .map(|(chat_id, script)| (chat_id.to_string(), *script))
            .collect();
        let remaining = scripts
            .iter()
            .filter_map(|(chat_id, script)| match script {
                Script::TransientThenOk(failures) => Some((chat_id.clone(), *failures)),
                _ => None,
            })
            .collect();
        Arc::new(Self {
            scripts,
            remaining: Mutex::new(remaining),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, chat_id: &str) -> usize {
        self.calls().iter().filter(|(id, _)| id == chat_id).count()
    }
}

#[async_trait]
impl MessageChannel for MockChannel {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));

        match self.scripts.get(chat_id).copied().unwrap_or(Script::Ok) {
            Script::Ok => Ok(()),
            Script::AlwaysTransient => Err(ChannelError::Network("timeout".to_string())),
            Script::Permanent => Err(ChannelError::Rejected("chat not found".to_string())),
            Script::Panics => panic!("mock channel blew up"),
            Script::TransientThenOk(_) => {
                let mut remaining = self.remaining.lock().unwrap();
                let left = remaining.entry(chat_id.to_string()).or_insert(0);
                if *left > 0 {
                    *left -= 1;
                    Err(ChannelError::Network("timeout".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn due_habit(user_id: &str, action: &str, place: &str) -> DueHabit {
    DueHabit {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        action: action.to_string(),
        place: place.to_string(),
    }
}

fn scheduler(store: MockStore, channel: Arc<MockChannel>) -> Scheduler<MockStore> {
    Scheduler::builder()
        .store(store)
        .channel(channel)
        .timezone("Europe/Moscow")
        .pool_size(4)
        .retry_policy(RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(2),
        })
        .build()
        .unwrap()
}

fn nine_am() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

#[tokio::test]
async fn due_habit_is_delivered_exactly_once() {
    let channel = MockChannel::new(&[]);
    let store = MockStore {
        habits: vec![due_habit("alice", "Meditate", "Park")],
        chat_ids: HashMap::from([("alice".to_string(), "42".to_string())]),
        ..Default::default()
    };

    let batch = scheduler(store, channel.clone()).tick(nine_am()).await;

    assert_eq!(batch.sent(), 1);
    assert_eq!(batch.outcomes().len(), 1);
    assert_eq!(batch.outcomes()[0].1, Outcome::Sent);
    assert_eq!(
        channel.calls(),
        vec![("42".to_string(), "Reminder: Meditate at Park.".to_string())]
    );
}

#[tokio::test]
async fn owner_without_channel_address_is_skipped() {
    let channel = MockChannel::new(&[]);
    let store = MockStore {
        habits: vec![due_habit("bob", "Run", "Track")],
        ..Default::default()
    };

    let batch = scheduler(store, channel.clone()).tick(nine_am()).await;

    assert_eq!(batch.skipped(), 1);
    assert_eq!(
        batch.outcomes()[0].1,
        Outcome::Skipped(SkipReason::NoChannel)
    );
    assert!(channel.calls().is_empty());
}

#[tokio::test]
async fn transient_failures_within_budget_still_deliver() {
    let channel = MockChannel::new(&[("42", Script::TransientThenOk(3))]);
    let store = MockStore {
        habits: vec![due_habit("alice", "Meditate", "Park")],
        chat_ids: HashMap::from([("alice".to_string(), "42".to_string())]),
        ..Default::default()
    };

    let batch = scheduler(store, channel.clone()).tick(nine_am()).await;

    assert_eq!(batch.sent(), 1);
    assert_eq!(channel.calls_to("42"), 4);
}

#[tokio::test]
async fn exhausted_retries_do_not_stall_the_batch() {
    let channel = MockChannel::new(&[("1", Script::AlwaysTransient)]);
    let failing = due_habit("alice", "Meditate", "Park");
    let healthy = due_habit("bob", "Read", "Cafe");
    let store = MockStore {
        habits: vec![failing.clone(), healthy.clone()],
        chat_ids: HashMap::from([
            ("alice".to_string(), "1".to_string()),
            ("bob".to_string(), "2".to_string()),
        ]),
        ..Default::default()
    };

    let batch = scheduler(store, channel.clone()).tick(nine_am()).await;

    assert_eq!(batch.sent(), 1);
    assert_eq!(batch.failed(), 1);
    // First attempt plus three retries for the failing habit.
    assert_eq!(channel.calls_to("1"), 4);
    assert_eq!(channel.calls_to("2"), 1);

    for (habit_id, outcome) in batch.outcomes() {
        if *habit_id == failing.id {
            assert!(matches!(
                outcome,
                Outcome::Failed(DeliveryError::Transient(_))
            ));
        } else {
            assert_eq!(*habit_id, healthy.id);
            assert_eq!(*outcome, Outcome::Sent);
        }
    }
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let channel = MockChannel::new(&[("42", Script::Permanent)]);
    let store = MockStore {
        habits: vec![due_habit("alice", "Meditate", "Park")],
        chat_ids: HashMap::from([("alice".to_string(), "42".to_string())]),
        ..Default::default()
    };

    let batch = scheduler(store, channel.clone()).tick(nine_am()).await;

    assert_eq!(batch.failed(), 1);
    assert_eq!(
        batch.outcomes()[0].1,
        Outcome::Failed(DeliveryError::Permanent(ChannelError::Rejected(
            "chat not found".to_string()
        )))
    );
    assert_eq!(channel.calls_to("42"), 1);
}

#[tokio::test]
async fn store_failure_yields_an_empty_batch() {
    let channel = MockChannel::new(&[]);
    let store = MockStore {
        habits: vec![due_habit("alice", "Meditate", "Park")],
        chat_ids: HashMap::from([("alice".to_string(), "42".to_string())]),
        fail_query: true,
        ..Default::default()
    };

    let batch = scheduler(store, channel.clone()).tick(nine_am()).await;

    assert!(batch.is_empty());
    assert!(channel.calls().is_empty());
}

#[tokio::test]
async fn panicking_dispatch_is_recorded_without_losing_the_batch() {
    let channel = MockChannel::new(&[("1", Script::Panics)]);
    let crashing = due_habit("alice", "Meditate", "Park");
    let healthy = due_habit("bob", "Read", "Cafe");
    let store = MockStore {
        habits: vec![crashing.clone(), healthy.clone()],
        chat_ids: HashMap::from([
            ("alice".to_string(), "1".to_string()),
            ("bob".to_string(), "2".to_string()),
        ]),
        ..Default::default()
    };

    let batch = scheduler(store, channel.clone()).tick(nine_am()).await;

    assert_eq!(batch.outcomes().len(), 2);
    assert_eq!(batch.sent(), 1);
    assert_eq!(batch.failed(), 1);
    for (habit_id, outcome) in batch.outcomes() {
        if *habit_id == crashing.id {
            assert!(matches!(
                outcome,
                Outcome::Failed(DeliveryError::Permanent(_))
            ));
        } else {
            assert_eq!(*habit_id, healthy.id);
            assert_eq!(*outcome, Outcome::Sent);
        }
    }
}

#[tokio::test]
async fn retrying_batch_does_not_suppress_later_scans() {
    let channel = MockChannel::new(&[("1", Script::AlwaysTransient)]);
    let queries = Arc::new(AtomicUsize::new(0));
    let store = MockStore {
        habits: vec![due_habit("alice", "Meditate", "Park")],
        chat_ids: HashMap::from([("alice".to_string(), "1".to_string())]),
        queries: queries.clone(),
        ..Default::default()
    };
    let scheduler = Scheduler::builder()
        .store(store)
        .channel(channel)
        .cadence(Duration::from_millis(40))
        .retry_policy(RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(250),
        })
        .build()
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(scheduler.run(shutdown_rx));

    // The first batch backs off for ~750ms in total; the scan cadence
    // must keep running underneath it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let scans = queries.load(Ordering::SeqCst);
    assert!(scans >= 4, "expected scans to continue during retries, got {scans}");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_millis(500), runner)
        .await
        .expect("scheduler should stop promptly")
        .unwrap();
}

#[tokio::test]
async fn shutdown_drops_pending_retries() {
    let channel = MockChannel::new(&[("1", Script::AlwaysTransient)]);
    let store = MockStore {
        habits: vec![due_habit("alice", "Meditate", "Park")],
        chat_ids: HashMap::from([("alice".to_string(), "1".to_string())]),
        ..Default::default()
    };
    let scheduler = Scheduler::builder()
        .store(store)
        .channel(channel.clone())
        .cadence(Duration::from_millis(30))
        .retry_policy(RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_secs(60),
        })
        .build()
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(scheduler.run(shutdown_rx));

    // Let the first batch fail its first attempt and enter backoff.
    tokio::time::sleep(Duration::from_millis(80)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_millis(500), runner)
        .await
        .expect("shutdown must not wait for pending retries")
        .unwrap();
}

#[test]
fn builder_requires_store_and_channel() {
    let err = Scheduler::<MockStore>::builder().build().unwrap_err();
    assert_eq!(err, BuildError::MissingStore);

    let err = Scheduler::builder()
        .store(MockStore::default())
        .build()
        .unwrap_err();
    assert_eq!(err, BuildError::MissingChannel);
}

#[test]
fn builder_rejects_unknown_timezone() {
    let err = Scheduler::builder()
        .store(MockStore::default())
        .channel(MockChannel::new(&[]))
        .timezone("Mars/Olympus")
        .build()
        .unwrap_err();
    assert_eq!(err, BuildError::InvalidTimezone("Mars/Olympus".to_string()));
}

#[tokio::test]
async fn reinvoking_a_tick_reattempts_the_same_set() {
    let channel = MockChannel::new(&[]);
    let store = MockStore {
        habits: vec![due_habit("alice", "Meditate", "Park")],
        chat_ids: HashMap::from([("alice".to_string(), "42".to_string())]),
        ..Default::default()
    };
    let scheduler = scheduler(store, channel.clone());

    let first = scheduler.tick(nine_am()).await;
    let second = scheduler.tick(nine_am()).await;

    assert_eq!(first.sent(), 1);
    assert_eq!(second.sent(), 1);
    assert_eq!(channel.calls_to("42"), 2);
}
