//! Per-device presence state machine.
//!
//! Each device is either present or absent. It starts absent and becomes
//! present when any channel sees it; it becomes absent again once no channel
//! has seen it for longer than its away threshold.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Seconds per minute, used for every minute-based threshold.
pub const SECS_PER_MINUTE: u64 = 60;

/// A discovery channel through which a device can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Address sweep, reverse lookup, reachability probe, or passive request.
    Ip,
    /// Bluetooth discovery.
    Bluetooth,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ip => "IP",
            Self::Bluetooth => "BT",
        })
    }
}

/// Join channels the way the `<id>.here` attribute shows them, e.g. `"IP, BT"`.
#[must_use]
pub fn format_channels(channels: &[Channel]) -> String {
    channels
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The outcome of an evaluation that should be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    /// Presence after the evaluation.
    pub present: bool,
    /// Whether `present` differs from before the evaluation.
    pub flipped: bool,
    /// Most recent confirmed sighting.
    pub last_here: DateTime<Utc>,
    /// Channels that saw the device this round.
    pub channels: Vec<Channel>,
}

/// Mutable presence inputs and derived state for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceState {
    ip_last_seen: Option<DateTime<Utc>>,
    bt_last_seen: Option<DateTime<Utc>>,
    last_here: Option<DateTime<Utc>>,
    /// `last_here` came from a channel or a previous run, not the
    /// never-seen placeholder.
    sighted: bool,
    present: bool,
    present_since_count: u32,
}

impl PresenceState {
    /// Record an IP-channel sighting. Returns `false` if one was already
    /// recorded this round.
    pub fn mark_ip(&mut self, now: DateTime<Utc>) -> bool {
        mark(&mut self.ip_last_seen, now)
    }

    /// Record a Bluetooth sighting. Returns `false` if one was already
    /// recorded this round.
    pub fn mark_bluetooth(&mut self, now: DateTime<Utc>) -> bool {
        mark(&mut self.bt_last_seen, now)
    }

    /// Whether any channel has seen the device this round.
    #[must_use]
    pub const fn seen_this_round(&self) -> bool {
        self.ip_last_seen.is_some() || self.bt_last_seen.is_some()
    }

    /// Channels that saw the device this round, IP first.
    #[must_use]
    pub fn here_channels(&self) -> Vec<Channel> {
        let mut channels = Vec::with_capacity(2);
        if self.ip_last_seen.is_some() {
            channels.push(Channel::Ip);
        }
        if self.bt_last_seen.is_some() {
            channels.push(Channel::Bluetooth);
        }
        channels
    }

    /// Recompute presence at `now` against `threshold`.
    ///
    /// Returns a change only when `present` flipped or `last_here` moved.
    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Option<PresenceChange> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let before = (self.present, self.last_here);

        let most_recent = self.ip_last_seen.max(self.bt_last_seen);
        match (most_recent, self.last_here) {
            (Some(seen), last) => {
                let last_here = last.map_or(seen, |l| l.max(seen));
                self.last_here = Some(last_here);
                self.sighted = true;
                self.present = now - last_here <= threshold;
            }
            (None, Some(last_here)) => {
                self.present = self.sighted && now - last_here <= threshold;
            }
            (None, None) => {
                self.last_here = Some(
                    now.checked_sub_signed(threshold)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                );
                self.present = false;
            }
        }

        let flipped = self.present != before.0;
        if flipped && !self.present {
            self.present_since_count = 0;
        }
        if !flipped && self.last_here == before.1 {
            return None;
        }

        Some(PresenceChange {
            present: self.present,
            flipped,
            last_here: self.last_here?,
            channels: self.here_channels(),
        })
    }

    /// Advance the consecutive-presence counter once per round.
    pub fn record_round(&mut self) -> u32 {
        if self.present {
            self.present_since_count = self.present_since_count.saturating_add(1);
        } else {
            self.present_since_count = 0;
        }
        self.present_since_count
    }

    /// Clear the per-round channel timestamps.
    pub fn reset_round(&mut self) {
        self.ip_last_seen = None;
        self.bt_last_seen = None;
    }

    /// Seed `last_here` from a previous run. Ignored once a value exists.
    pub fn restore_last_here(&mut self, last_here: DateTime<Utc>) {
        if self.last_here.is_none() {
            self.last_here = Some(last_here);
            self.sighted = true;
        }
    }

    /// Whether the device is currently present.
    #[must_use]
    pub const fn present(&self) -> bool {
        self.present
    }

    /// Most recent confirmed sighting, if any evaluation has run.
    #[must_use]
    pub const fn last_here(&self) -> Option<DateTime<Utc>> {
        self.last_here
    }

    /// Consecutive rounds the device has been present.
    #[must_use]
    pub const fn present_since_count(&self) -> u32 {
        self.present_since_count
    }

    /// IP-channel sighting time this round.
    #[must_use]
    pub const fn ip_last_seen(&self) -> Option<DateTime<Utc>> {
        self.ip_last_seen
    }

    /// Bluetooth sighting time this round.
    #[must_use]
    pub const fn bt_last_seen(&self) -> Option<DateTime<Utc>> {
        self.bt_last_seen
    }
}

fn mark(slot: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(now);
    true
}

/// Smallest engine-wide away delay, in whole minutes, that strictly exceeds
/// two scan intervals.
#[must_use]
pub fn min_away_minutes(interval: Duration) -> u32 {
    let minutes = interval.as_secs().saturating_mul(2) / SECS_PER_MINUTE + 1;
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// Engine-wide away threshold plus the per-device override rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwayPolicy {
    configured_minutes: u32,
    default_minutes: u32,
}

impl AwayPolicy {
    /// Policy for a configured default and the current scan interval.
    #[must_use]
    pub fn new(configured_minutes: u32, interval: Duration) -> Self {
        let mut policy = Self {
            configured_minutes,
            default_minutes: configured_minutes,
        };
        policy.recompute(interval);
        policy
    }

    /// Re-clamp the default after the scan interval changed.
    pub fn recompute(&mut self, interval: Duration) {
        self.default_minutes = self.configured_minutes.max(min_away_minutes(interval));
    }

    /// The engine-wide default in minutes.
    #[must_use]
    pub const fn default_minutes(&self) -> u32 {
        self.default_minutes
    }

    /// Threshold for a device with the given override. Negative or absent
    /// overrides use the default.
    #[must_use]
    pub fn threshold(&self, override_minutes: Option<i64>) -> Duration {
        let minutes = override_minutes
            .and_then(|m| u64::try_from(m).ok())
            .unwrap_or_else(|| u64::from(self.default_minutes));
        Duration::from_secs(minutes.saturating_mul(SECS_PER_MINUTE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[test]
    fn test_never_seen_starts_absent() {
        let mut state = PresenceState::default();
        let change = state.evaluate(t0(), TEN_MINUTES).unwrap();

        assert!(!change.present);
        assert!(!change.flipped);
        assert_eq!(state.last_here(), Some(t0() - minutes(10)));
        assert!(!state.present());

        // Idle re-evaluation is silent.
        assert_eq!(state.evaluate(t0() + minutes(1), TEN_MINUTES), None);
    }

    #[test]
    fn test_never_seen_stays_absent_at_same_instant() {
        let mut state = PresenceState::default();
        state.evaluate(t0(), TEN_MINUTES);
        assert_eq!(state.evaluate(t0(), TEN_MINUTES), None);
        assert!(!state.present());
    }

    #[test]
    fn test_never_seen_stays_absent_when_threshold_widens() {
        let mut state = PresenceState::default();
        state.evaluate(t0(), TEN_MINUTES);
        let wider = Duration::from_secs(3600);
        assert_eq!(state.evaluate(t0() + minutes(2), wider), None);
        assert!(!state.present());

        state.mark_bluetooth(t0() + minutes(3));
        let arrived = state.evaluate(t0() + minutes(3), wider).unwrap();
        assert!(arrived.present && arrived.flipped);
    }

    #[test]
    fn test_threshold_crossing_emits_once() {
        let mut state = PresenceState::default();
        state.mark_ip(t0());
        let arrived = state.evaluate(t0(), TEN_MINUTES).unwrap();
        assert!(arrived.present && arrived.flipped);
        assert_eq!(arrived.channels, vec![Channel::Ip]);
        state.reset_round();

        assert_eq!(state.evaluate(t0() + minutes(9), TEN_MINUTES), None);
        assert!(state.present());

        let left = state.evaluate(t0() + minutes(11), TEN_MINUTES).unwrap();
        assert!(!left.present && left.flipped);
        assert_eq!(left.last_here, t0());

        assert_eq!(state.evaluate(t0() + minutes(12), TEN_MINUTES), None);
    }

    #[test]
    fn test_exact_threshold_is_present() {
        let mut state = PresenceState::default();
        state.mark_bluetooth(t0());
        state.evaluate(t0(), TEN_MINUTES);
        state.reset_round();
        assert_eq!(state.evaluate(t0() + minutes(10), TEN_MINUTES), None);
        assert!(state.present());
    }

    #[test]
    fn test_mark_is_idempotent_within_round() {
        let mut state = PresenceState::default();
        assert!(state.mark_ip(t0()));
        assert!(!state.mark_ip(t0() + minutes(1)));
        assert_eq!(state.ip_last_seen(), Some(t0()));
    }

    #[test]
    fn test_last_here_advances_without_flip() {
        let mut state = PresenceState::default();
        state.mark_ip(t0());
        state.evaluate(t0(), TEN_MINUTES);
        state.reset_round();

        state.mark_bluetooth(t0() + minutes(1));
        let change = state.evaluate(t0() + minutes(1), TEN_MINUTES).unwrap();
        assert!(change.present);
        assert!(!change.flipped);
        assert_eq!(change.channels, vec![Channel::Bluetooth]);
    }

    #[test]
    fn test_counter() {
        let mut state = PresenceState::default();
        state.mark_ip(t0());
        state.evaluate(t0(), TEN_MINUTES);
        assert_eq!(state.record_round(), 1);
        assert_eq!(state.record_round(), 2);

        state.reset_round();
        state.evaluate(t0() + minutes(30), TEN_MINUTES);
        assert_eq!(state.present_since_count(), 0);
        assert_eq!(state.record_round(), 0);
    }

    #[test]
    fn test_restore_last_here() {
        let mut state = PresenceState::default();
        state.restore_last_here(t0() - minutes(3));
        assert!(state.evaluate(t0(), TEN_MINUTES).unwrap().present);
    }

    #[test]
    fn test_format_channels() {
        assert_eq!(format_channels(&[Channel::Ip, Channel::Bluetooth]), "IP, BT");
        assert_eq!(format_channels(&[]), "");
    }

    #[test]
    fn test_away_policy_clamps_above_two_intervals() {
        let policy = AwayPolicy::new(2, Duration::from_secs(15));
        assert_eq!(policy.default_minutes(), 2);

        let mut policy = AwayPolicy::new(2, Duration::from_secs(90));
        assert_eq!(policy.default_minutes(), 4);
        policy.recompute(Duration::from_secs(22));
        assert_eq!(policy.default_minutes(), 2);
        assert!(policy.threshold(None) > Duration::from_secs(44));
    }

    #[test]
    fn test_away_policy_override() {
        let policy = AwayPolicy::new(5, Duration::from_secs(15));
        assert_eq!(policy.threshold(Some(10)), TEN_MINUTES);
        assert_eq!(policy.threshold(Some(-1)), Duration::from_secs(300));
        assert_eq!(policy.threshold(None), Duration::from_secs(300));
    }
}
