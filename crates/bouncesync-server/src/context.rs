//! The exclusive section shared by the ticker and every command.
//!
//! [`ServerContext`] owns the [`ServerState`] (tables + physics world) behind
//! a single non-reentrant `parking_lot::Mutex`. Everything that mutates
//! either half runs inside [`ServerContext::exclusive`], so the tables and the
//! physics world can never be observed out of step with each other.
//!
//! When a section's closure returns, the table events it recorded are
//! published to the change feed while the lock is still held. Subscribers
//! therefore see sections in the order they committed, and a new subscriber's
//! snapshot can never miss or duplicate an event.

use std::time::Duration;

use bouncesync_core::feed::TableEvent;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::info;

use crate::config::ServerConfig;
use crate::feed::ChangeFeed;
use crate::physics::SimulationWorld;
use crate::tables::Tables;
use crate::tick::{TickScheduler, TimerFired};
use crate::ServerError;

// ---------------------------------------------------------------------------
// ServerState
// ---------------------------------------------------------------------------

/// Everything the exclusive section protects.
pub struct ServerState {
    /// Authoritative rows.
    pub tables: Tables,
    /// Physics bodies behind the rows.
    pub world: SimulationWorld,
    pub(crate) config: ServerConfig,
    /// Number of unseeded bursts issued so far; feeds seed derivation.
    pub(crate) burst_invocations: u64,
}

impl ServerState {
    /// Fresh tables and a world containing only the ground.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            tables: Tables::new(),
            world: SimulationWorld::new(&config.physics),
            config,
            burst_invocations: 0,
        }
    }

    /// The configuration this state was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// ServerContext
// ---------------------------------------------------------------------------

/// Owning handle to the server state and its change feed.
///
/// Share it between threads with an `Arc`.
pub struct ServerContext {
    config: ServerConfig,
    state: Mutex<ServerState>,
    feed: Mutex<ChangeFeed>,
}

impl ServerContext {
    /// Validate `config` and build an empty simulation.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        info!(
            tick_interval_ms = config.tick_interval_ms,
            burst_count = config.burst.count,
            "initializing physics world"
        );
        Ok(Self {
            state: Mutex::new(ServerState::new(config.clone())),
            config,
            feed: Mutex::new(ChangeFeed::new()),
        })
    }

    /// Run `f` with exclusive access to the server state, then publish the
    /// events it recorded.
    ///
    /// Not reentrant: calling `exclusive` (or any command) from inside `f`
    /// deadlocks.
    pub fn exclusive<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        let events = state.tables.take_events();
        if !events.is_empty() {
            self.feed.lock().publish(&events);
        }
        result
    }

    /// Subscribe to the `entity` and `transform` tables.
    ///
    /// The receiver first yields an insert for every current row, then every
    /// change committed after this call.
    pub fn subscribe(&self) -> Receiver<TableEvent> {
        let state = self.state.lock();
        let snapshot = state.tables.snapshot_events();
        self.feed.lock().subscribe(snapshot)
    }

    /// Number of live change-feed subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.feed.lock().subscriber_count()
    }

    /// A scheduler armed at `start` with the configured interval; its first
    /// timer is recorded in the `tick_timer` table.
    pub fn arm_scheduler(&self, start: Duration) -> TickScheduler {
        let scheduler = TickScheduler::new(self.config.tick_interval(), start);
        let timer = *scheduler.timer();
        self.exclusive(|state| state.tables.set_tick_timer(timer));
        scheduler
    }

    /// Scheduler step: record the re-armed timer and advance the world once.
    /// Returns the number of transform rows written.
    pub fn run_tick(&self, event: &TimerFired) -> usize {
        self.exclusive(|state| {
            state.tables.set_tick_timer(event.rearmed);
            state.tick()
        })
    }

    /// Advance the world once outside the scheduler.
    pub fn tick(&self) -> usize {
        self.exclusive(|state| state.tick())
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncesync_core::feed::RowEvent;
    use bouncesync_core::rows::{Entity, TickTimer};

    fn context() -> ServerContext {
        ServerContext::new(ServerConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let mut config = ServerConfig::default();
        config.tick_interval_ms = 0;
        assert!(matches!(
            ServerContext::new(config),
            Err(ServerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn sections_publish_in_commit_order() {
        let ctx = context();
        let feed = ctx.subscribe();
        ctx.exclusive(|state| {
            let id = state.tables.allocate_entity_id();
            state.tables.insert_entity(Entity { id }).unwrap();
        });
        ctx.exclusive(|state| {
            let id = state.tables.allocate_entity_id();
            state.tables.insert_entity(Entity { id }).unwrap();
        });
        let ids: Vec<u32> = feed.try_iter().map(|e| e.entity_id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn read_only_section_publishes_nothing() {
        let ctx = context();
        let feed = ctx.subscribe();
        let count = ctx.exclusive(|state| state.tables.entity_count());
        assert_eq!(count, 0);
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn subscribe_snapshots_existing_rows() {
        let ctx = context();
        ctx.exclusive(|state| {
            state.tables.insert_entity(Entity { id: 5 }).unwrap();
        });
        let feed = ctx.subscribe();
        let events: Vec<TableEvent> = feed.try_iter().collect();
        assert_eq!(
            events,
            vec![TableEvent::Entity(RowEvent::Insert(Entity { id: 5 }))]
        );
        assert_eq!(ctx.subscriber_count(), 1);
    }

    #[test]
    fn dropped_subscriber_pruned_on_publish() {
        let ctx = context();
        drop(ctx.subscribe());
        let _kept = ctx.subscribe();
        ctx.exclusive(|state| {
            state.tables.insert_entity(Entity { id: 1 }).unwrap();
        });
        assert_eq!(ctx.subscriber_count(), 1);
    }

    #[test]
    fn scheduler_timer_recorded() {
        let ctx = context();
        let scheduler = ctx.arm_scheduler(Duration::ZERO);
        let row = ctx.exclusive(|state| state.tables.tick_timer().copied());
        assert_eq!(row, Some(*scheduler.timer()));
        assert_eq!(row.unwrap().scheduled_at, Duration::from_millis(16));

        let fired = *scheduler.timer();
        let rearmed = fired.next(ctx.config().tick_interval());
        ctx.run_tick(&TimerFired { fired, rearmed });
        let row = ctx.exclusive(|state| state.tables.tick_timer().copied());
        assert_eq!(
            row,
            Some(TickTimer {
                id: 2,
                scheduled_at: Duration::from_millis(32)
            })
        );
    }
}
