use core::fmt::Write;

use rand::Rng;
use uuid::Uuid;

/// RFC 3261 magic cookie every branch must start with.
pub const BRANCH_MAGIC: &str = "z9hG4bK";
const BRANCH_RANDOM_BYTES: usize = 10;

pub type Branch = heapless::String<32>;
pub type Tag = heapless::String<16>;

/// Identifiers of the registration dialog plus the per-process instance id.
#[derive(Debug, Clone)]
pub struct DialogIdentity {
    call_id: String,
    instance: Uuid,
    tag: Tag,
    branch: Branch,
    cseq: u32,
}

impl DialogIdentity {
    pub fn new(client_ip: &str) -> Self {
        Self {
            call_id: new_call_id(client_ip),
            instance: Uuid::new_v4(),
            tag: new_tag(),
            branch: new_branch(),
            cseq: 1,
        }
    }

    /// Start a new registration dialog, e.g. after the client address moved.
    /// The instance id survives.
    pub fn restart(&mut self, client_ip: &str) {
        self.call_id = new_call_id(client_ip);
        self.tag = new_tag();
        self.branch = new_branch();
        self.cseq = 1;
    }

    /// Fresh branch for the next transmitted request, retries included.
    pub fn next_branch(&mut self) -> &str {
        self.branch = new_branch();
        &self.branch
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn instance(&self) -> &Uuid {
        &self.instance
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn set_cseq(&mut self, cseq: u32) {
        self.cseq = cseq;
    }

    /// The peer echoed `echoed`; our next request uses the number after it.
    pub fn advance_from_peer(&mut self, echoed: u32) {
        self.cseq = echoed.wrapping_add(1);
    }
}

pub fn new_branch() -> Branch {
    let bytes: [u8; BRANCH_RANDOM_BYTES] = rand::random();
    let mut branch = Branch::new();
    let _ = branch.push_str(BRANCH_MAGIC);
    for b in &bytes {
        let _ = write!(branch, "{:02x}", b);
    }
    branch
}

pub fn new_tag() -> Tag {
    let value = rand::rng().random_range(1..=i32::MAX as u32);
    let mut tag = Tag::new();
    let _ = write!(tag, "{}", value);
    tag
}

pub fn new_call_id(client_ip: &str) -> String {
    format!("{}@{}", Uuid::new_v4(), client_ip)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn branch_has_cookie_and_twenty_hex_chars() {
        let branch = new_branch();
        assert!(branch.starts_with(BRANCH_MAGIC));
        let random = &branch[BRANCH_MAGIC.len()..];
        assert_eq!(random.len(), 20);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn branches_do_not_repeat() {
        let seen: HashSet<Branch> = (0..1000).map(|_| new_branch()).collect();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn tag_is_positive_integer() {
        for _ in 0..100 {
            let tag: u32 = new_tag().parse().unwrap();
            assert!(tag >= 1 && tag <= i32::MAX as u32);
        }
    }

    #[test]
    fn restart_keeps_instance_only() {
        let mut dialog = DialogIdentity::new("192.168.178.20");
        assert!(dialog.call_id().ends_with("@192.168.178.20"));
        dialog.advance_from_peer(7);
        assert_eq!(dialog.cseq(), 8);

        let instance = *dialog.instance();
        let call_id = dialog.call_id().to_string();
        dialog.restart("10.0.0.5");

        assert_eq!(*dialog.instance(), instance);
        assert_ne!(dialog.call_id(), call_id);
        assert!(dialog.call_id().ends_with("@10.0.0.5"));
        assert_eq!(dialog.cseq(), 1);
    }

    #[test]
    fn next_branch_replaces_previous() {
        let mut dialog = DialogIdentity::new("192.0.2.1");
        let first = dialog.branch().to_string();
        let second = dialog.next_branch().to_string();
        assert_ne!(first, second);
        assert_eq!(dialog.branch(), second);
    }
}
