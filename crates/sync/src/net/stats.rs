use std::time::Duration;

use super::protocol::DeliveryGuarantee;

/// Artificial loss and latency applied to outgoing traffic. Loss only ever
/// hits traffic whose guarantee tolerates it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self, guarantee: DeliveryGuarantee) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 || guarantee.is_reliable() {
            return false;
        }
        rand_percent() * 100.0 < self.loss_percent
    }

    pub fn delay(&self) -> Duration {
        if !self.enabled || self.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            (rand_percent() * self.jitter_ms as f32) as u32
        } else {
            0
        };
        Duration::from_millis(u64::from(
            base + (rand_percent() * range as f32) as u32 + jitter,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_resent: u64,
    pub packets_dropped_stale: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
    pub packet_loss_percent: f32,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }
}

pub fn rand_percent() -> f32 {
    (rand_u64() % 10_000) as f32 / 10_000.0
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(nanos);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_traffic_is_never_dropped() {
        let sim = PacketLossSimulation {
            enabled: true,
            loss_percent: 100.0,
            ..Default::default()
        };
        assert!(!sim.should_drop(DeliveryGuarantee::ReliableOrdered));
        assert!(!sim.should_drop(DeliveryGuarantee::ReliableUnordered));
        assert!(sim.should_drop(DeliveryGuarantee::Sequenced));
        assert!(sim.should_drop(DeliveryGuarantee::Unreliable));
    }

    #[test]
    fn test_disabled_simulation_adds_nothing() {
        let sim = PacketLossSimulation {
            enabled: false,
            loss_percent: 100.0,
            min_latency_ms: 50,
            max_latency_ms: 100,
            jitter_ms: 10,
        };
        assert!(!sim.should_drop(DeliveryGuarantee::Unreliable));
        assert_eq!(sim.delay(), Duration::ZERO);
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let sim = PacketLossSimulation {
            enabled: true,
            loss_percent: 0.0,
            min_latency_ms: 20,
            max_latency_ms: 40,
            jitter_ms: 5,
        };
        for _ in 0..50 {
            let delay = sim.delay();
            assert!(delay >= Duration::from_millis(20));
            assert!(delay <= Duration::from_millis(45));
        }
    }
}
