use std::time::{Duration, Instant};

use log::debug;

const DEFAULT_FRACTION: f64 = 0.75;
const MIN_RENEWAL: Duration = Duration::from_secs(1);

/// When to renew a registration lease of `expires` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LeasePolicy {
    /// Renew after `expires × fraction`.
    Fraction(f64),
    /// Renew `lead` before the lease runs out.
    LeadTime(Duration),
}

impl Default for LeasePolicy {
    fn default() -> Self {
        LeasePolicy::Fraction(DEFAULT_FRACTION)
    }
}

impl LeasePolicy {
    /// Delay until renewal. Never below one second, and strictly inside the
    /// lease whenever the lease is longer than that.
    pub fn renew_after(&self, expires: u32) -> Duration {
        let lease = Duration::from_secs(u64::from(expires));
        let renew = match *self {
            LeasePolicy::Fraction(f) => {
                let f = if (0.0..=1.0).contains(&f) { f } else { DEFAULT_FRACTION };
                lease.mul_f64(f)
            }
            LeasePolicy::LeadTime(lead) if lead < lease => lease - lead,
            LeasePolicy::LeadTime(_) => lease / 2,
        };
        let ceiling = lease.saturating_sub(MIN_RENEWAL).max(MIN_RENEWAL);
        renew.clamp(MIN_RENEWAL, ceiling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationLease {
    expires: u32,
    next_registration: Option<Instant>,
    registered: bool,
}

impl RegistrationLease {
    pub fn new(expires: u32) -> Self {
        Self {
            expires,
            next_registration: None,
            registered: false,
        }
    }

    /// Record a successful REGISTER. `granted` is the server's expires value
    /// if it sent one; otherwise `requested` stands.
    pub fn renew(&mut self, granted: Option<u32>, requested: u32, policy: &LeasePolicy, now: Instant) {
        self.expires = granted.unwrap_or(requested);
        let delay = policy.renew_after(self.expires);
        self.next_registration = Some(now + delay);
        self.registered = true;
        debug!("lease of {}s renews in {:?}", self.expires, delay);
    }

    pub fn expire(&mut self) {
        self.registered = false;
        self.next_registration = None;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match (self.registered, self.next_registration) {
            (true, Some(next)) => now >= next,
            _ => true,
        }
    }

    pub fn expires(&self) -> u32 {
        self.expires
    }

    pub fn next_registration(&self) -> Option<Instant> {
        self.next_registration
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_lands_inside_lease() {
        let now = Instant::now();
        let mut lease = RegistrationLease::new(3600);
        lease.renew(Some(300), 3600, &LeasePolicy::Fraction(0.75), now);

        let next = lease.next_registration().unwrap();
        assert!(next > now);
        assert!(next < now + Duration::from_secs(300));
        assert_eq!(next - now, Duration::from_secs(225));
        assert_eq!(lease.expires(), 300);
        assert!(lease.is_registered());
    }

    #[test]
    fn lead_time_subtracts_from_lease() {
        let policy = LeasePolicy::LeadTime(Duration::from_secs(30));
        assert_eq!(policy.renew_after(300), Duration::from_secs(270));
        // Lead longer than the lease falls back to half of it.
        assert_eq!(policy.renew_after(20), Duration::from_secs(10));
    }

    #[test]
    fn renewal_stays_strictly_inside_lease() {
        assert_eq!(LeasePolicy::Fraction(1.0).renew_after(300), Duration::from_secs(299));
        assert_eq!(LeasePolicy::Fraction(0.0).renew_after(300), Duration::from_secs(1));
        assert_eq!(LeasePolicy::Fraction(f64::NAN).renew_after(100), Duration::from_secs(75));
        assert_eq!(LeasePolicy::default().renew_after(0), Duration::from_secs(1));
    }

    #[test]
    fn requested_expires_used_without_server_value() {
        let now = Instant::now();
        let mut lease = RegistrationLease::new(60);
        lease.renew(None, 600, &LeasePolicy::default(), now);
        assert_eq!(lease.expires(), 600);
    }

    #[test]
    fn due_until_registered_and_after_deadline() {
        let now = Instant::now();
        let mut lease = RegistrationLease::new(300);
        assert!(lease.is_due(now));

        lease.renew(None, 300, &LeasePolicy::default(), now);
        assert!(!lease.is_due(now));
        assert!(lease.is_due(now + Duration::from_secs(225)));

        lease.expire();
        assert!(!lease.is_registered());
        assert!(lease.is_due(now));
    }
}
