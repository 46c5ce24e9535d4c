//! Background tasks: one growth loop per world plus periodic maintenance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gt_rs_world::WorldError;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::realm::Realm;

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub tick_interval: Duration,
    pub progress_per_tick: u32,
    pub lock_sweep_interval: Duration,
    pub session_sweep_interval: Duration,
}

pub struct Scheduler {
    realm: Arc<Realm>,
    timings: Timings,
    shutdown_rx: watch::Receiver<bool>,
    growth_tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(realm: Arc<Realm>, timings: Timings, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            realm,
            timings,
            shutdown_rx,
            growth_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start a growth loop for every known world.
    pub fn start_all(&self) {
        for world_id in self.realm.registry.world_ids() {
            self.ensure_growth(world_id);
        }
    }

    /// Start the growth loop for `world_id` unless one is already running.
    pub fn ensure_growth(&self, world_id: u64) {
        let mut tasks = self.growth_tasks.lock();
        if tasks.get(&world_id).is_some_and(|h| !h.is_finished()) {
            return;
        }
        let handle = tokio::spawn(growth_loop(
            self.realm.clone(),
            world_id,
            self.timings,
            self.shutdown_rx.clone(),
        ));
        tasks.insert(world_id, handle);
        debug!("growth task started for world {world_id}");
    }

    pub fn running_growth_tasks(&self) -> usize {
        self.growth_tasks
            .lock()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        tokio::spawn(maintenance_loop(
            self.realm.clone(),
            self.timings,
            self.shutdown_rx.clone(),
        ))
    }

    /// Wait for every growth task to wind down after shutdown was signalled.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self.growth_tasks.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn growth_loop(
    realm: Arc<Realm>,
    world_id: u64,
    timings: Timings,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(timings.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // The pass holds the world write lock and writes every tree
                // to the store, so it runs off the async workers.
                let pass_realm = realm.clone();
                let stop = shutdown_rx.clone();
                let delta = timings.progress_per_tick;
                let result = tokio::task::spawn_blocking(move || {
                    pass_realm
                        .growth
                        .tick_world(world_id, delta, || *stop.borrow())
                })
                .await;
                match result {
                    Ok(Ok(report)) if report.matured > 0 => {
                        info!("world {world_id}: {} tree(s) ready to harvest", report.matured);
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(WorldError::WorldNotFound(_))) => {
                        warn!("world {world_id} vanished, stopping its growth task");
                        break;
                    }
                    Ok(Err(e)) => warn!("growth tick for world {world_id} failed: {e}"),
                    Err(e) => warn!("growth pass for world {world_id} did not finish: {e}"),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!("growth task for world {world_id} stopped");
}

async fn maintenance_loop(
    realm: Arc<Realm>,
    timings: Timings,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut lock_sweep = tokio::time::interval(timings.lock_sweep_interval);
    let mut session_sweep = tokio::time::interval(timings.session_sweep_interval);
    lock_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    session_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = lock_sweep.tick() => {
                let report = realm.grid.sweep_expired_locks();
                if report.locks > 0 {
                    info!(
                        "Swept {} expired lock(s) ({} block(s), {} world(s) cleared)",
                        report.locks, report.blocks_cleared, report.worlds_cleared
                    );
                }
            }
            _ = session_sweep.tick() => {
                let removed = realm.sessions.sweep_expired();
                if removed > 0 {
                    info!("Swept {removed} expired session(s)");
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
