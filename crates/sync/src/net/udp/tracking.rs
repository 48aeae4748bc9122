use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::warn;

use super::frame::{FrameBody, sequence_greater_than};

const MIN_RESEND_TIMEOUT: Duration = Duration::from_millis(30);
const MAX_RESEND_TIMEOUT: Duration = Duration::from_millis(1000);
const MAX_BUFFERED_ORDERED: usize = 1024;

#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub sequence: u32,
    pub send_time: Instant,
    pub acked: bool,
    /// Body to send again under a new sequence if this frame is never acked.
    pub resend: Option<FrameBody>,
}

#[derive(Debug, Default)]
pub struct Expired {
    pub resend: Vec<FrameBody>,
    pub lost: usize,
}

#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingFrame>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }

    pub fn track_frame(&mut self, sequence: u32, resend: Option<FrameBody>) {
        while self.pending.len() >= self.max_pending {
            if let Some(evicted) = self.pending.pop_front() {
                if !evicted.acked && evicted.resend.is_some() {
                    warn!("ack window overflow, reliable frame {} dropped", evicted.sequence);
                }
            }
        }

        self.pending.push_back(PendingFrame {
            sequence,
            send_time: Instant::now(),
            acked: false,
            resend,
        });
    }

    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32) -> Vec<u32> {
        let mut acked_sequences = Vec::new();
        let mut rtt_samples = Vec::new();
        let now = Instant::now();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= 32 && (ack_bitfield & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                pending.resend = None;
                acked_sequences.push(pending.sequence);

                let rtt = now.duration_since(pending.send_time).as_secs_f32() * 1000.0;
                rtt_samples.push(rtt);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        self.compact();
        acked_sequences
    }

    /// Takes every frame that outlived the resend timeout. Reliable bodies come
    /// back for resending; unreliable frames are counted as lost.
    pub fn take_expired(&mut self, now: Instant) -> Expired {
        let timeout = self.resend_timeout();
        let mut expired = Expired::default();

        for pending in &mut self.pending {
            if pending.acked || now.duration_since(pending.send_time) < timeout {
                continue;
            }
            pending.acked = true;
            match pending.resend.take() {
                Some(body) => expired.resend.push(body),
                None => expired.lost += 1,
            }
        }

        self.compact();
        expired
    }

    pub fn resend_timeout(&self) -> Duration {
        let millis = self.srtt + 4.0 * self.rtt_var;
        Duration::from_secs_f32(millis.max(0.0) / 1000.0).clamp(MIN_RESEND_TIMEOUT, MAX_RESEND_TIMEOUT)
    }

    fn compact(&mut self) {
        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bitfield: u32,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bitfield: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
        }
    }

    /// Returns false for a sequence seen recently.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            if diff <= 32 {
                self.received_bitfield = (self.received_bitfield << diff) | 1;
            } else {
                self.received_bitfield = 0;
            }
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bitfield)
    }
}

/// Reassembles a reliable-ordered channel. Payloads are released strictly in
/// channel-sequence order; early arrivals wait in a bounded buffer.
#[derive(Debug, Default)]
pub struct OrderedChannel {
    next: u32,
    buffered: HashMap<u32, Vec<u8>>,
}

impl OrderedChannel {
    pub fn receive(&mut self, sequence: u32, data: Vec<u8>) -> Vec<Vec<u8>> {
        if sequence != self.next {
            if sequence_greater_than(sequence, self.next)
                && self.buffered.len() < MAX_BUFFERED_ORDERED
            {
                self.buffered.entry(sequence).or_insert(data);
            }
            return Vec::new();
        }

        let mut ready = vec![data];
        self.next = self.next.wrapping_add(1);
        while let Some(data) = self.buffered.remove(&self.next) {
            ready.push(data);
            self.next = self.next.wrapping_add(1);
        }
        ready
    }

    pub fn waiting(&self) -> usize {
        self.buffered.len()
    }
}

/// Newest-wins channel: anything not newer than the last delivered sample is
/// stale.
#[derive(Debug, Default)]
pub struct SequencedChannel {
    last: Option<u32>,
}

impl SequencedChannel {
    pub fn accept(&mut self, sequence: u32) -> bool {
        match self.last {
            Some(last) if !sequence_greater_than(sequence, last) => false,
            _ => {
                self.last = Some(sequence);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_tracker_bitfield() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(3);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3);
        tracker.record_received(1);
        tracker.record_received(2);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(1));
        assert!(!tracker.record_received(1));
        assert!(tracker.record_received(2));
    }

    #[test]
    fn test_ack_tracker_rtt() {
        let mut tracker = AckTracker::new(32);

        tracker.track_frame(1, None);
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(tracker.process_ack(1, 0), vec![1]);
        assert!(tracker.srtt() > 0.0);
        assert_eq!(tracker.unacked_count(), 0);
    }

    #[test]
    fn test_bitfield_acks_older_frames() {
        let mut tracker = AckTracker::new(32);
        for sequence in 1..=4 {
            tracker.track_frame(sequence, None);
        }

        // ack 4, plus 3 and 1 via the bitfield
        let acked = tracker.process_ack(4, 0b101);
        assert_eq!(acked, vec![1, 3, 4]);
        assert_eq!(tracker.unacked_count(), 1);
    }

    #[test]
    fn test_expired_reliable_frames_come_back() {
        let mut tracker = AckTracker::new(32);
        tracker.track_frame(1, Some(FrameBody::Disconnect));
        tracker.track_frame(2, None);

        let later = Instant::now() + MAX_RESEND_TIMEOUT + Duration::from_millis(1);
        let expired = tracker.take_expired(later);
        assert_eq!(expired.resend, vec![FrameBody::Disconnect]);
        assert_eq!(expired.lost, 1);
        assert_eq!(tracker.unacked_count(), 0);

        assert!(tracker.take_expired(later).resend.is_empty());
    }

    #[test]
    fn test_ordered_channel_waits_for_gaps() {
        let mut channel = OrderedChannel::default();

        assert!(channel.receive(1, vec![1]).is_empty());
        assert!(channel.receive(2, vec![2]).is_empty());
        assert_eq!(channel.waiting(), 2);

        assert_eq!(channel.receive(0, vec![0]), vec![vec![0], vec![1], vec![2]]);
        assert_eq!(channel.waiting(), 0);

        // duplicates of delivered payloads are ignored
        assert!(channel.receive(1, vec![1]).is_empty());
        assert_eq!(channel.receive(3, vec![3]), vec![vec![3]]);
    }

    #[test]
    fn test_sequenced_channel_drops_stale() {
        let mut channel = SequencedChannel::default();
        assert!(channel.accept(0));
        assert!(channel.accept(5));
        assert!(!channel.accept(3));
        assert!(!channel.accept(5));
        assert!(channel.accept(6));
    }
}
