use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

/// Clock abstraction so anything time-driven can run against a manual
/// clock in tests.
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    fn now_instant(&self) -> Instant;
    fn now_system(&self) -> SystemTime;
}

#[derive(Debug)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_instant(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A manual time provider for deterministic simulations.
#[derive(Debug)]
pub struct ManualTimeProvider {
    instant: RwLock<Instant>,
    system: RwLock<SystemTime>,
}

impl ManualTimeProvider {
    pub fn new(instant: Instant, system: SystemTime) -> Self {
        Self {
            instant: RwLock::new(instant),
            system: RwLock::new(system),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Instant::now(), SystemTime::now())
    }

    pub fn advance(&self, duration: Duration) {
        *self.instant.write().unwrap() += duration;
        *self.system.write().unwrap() += duration;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_instant(&self) -> Instant {
        *self.instant.read().unwrap()
    }

    fn now_system(&self) -> SystemTime {
        *self.system.read().unwrap()
    }
}
