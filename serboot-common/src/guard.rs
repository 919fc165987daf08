// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Control-flow key guard.
//!
//! Every legitimate path from the command loop to a flash commit perturbs the
//! write key pair in a fixed sequence. Right before committing, the caller
//! recomputes the pair it expects from its own locals. The commit only runs
//! when both agree, so a jump into the middle of a write path (corrupted PC,
//! brown-out) finds stale keys and does nothing.
//!
//! All arithmetic is wrapping `u16`.

/// A signed perturbation of both write keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    pub k1: i16,
    pub k2: i16,
}

impl Step {
    pub const fn new(k1: i16, k2: i16) -> Self {
        Self { k1, k2 }
    }

    pub const fn undo(self) -> Self {
        Self::new(self.k1.wrapping_neg(), self.k2.wrapping_neg())
    }
}

/// A request was received intact.
pub const RECEIVED: Step = Step::new(10, 42);
/// One storage unit was streamed through the write path.
pub const UNIT: Step = Step::new(4, -4);
/// One erase page, EEPROM word or config byte was visited.
pub const ITEM: Step = Step::new(1, -1);
/// Applied by the program primitive before it tests the keys.
pub const WRITE_COMMIT: Step = Step::new(-5, 6);
/// Applied by the erase primitive before it tests the keys.
pub const ERASE_COMMIT: Step = Step::new(7, 3);

const ARMED: (u16, u16) = (0xFFFF, 0x5555);
const SENTINEL: (u16, u16) = (0x0000, 0xAAAA);

/// Key pair after arming, receiving and folding address 0.
pub const KEY1_ORIGIN: u16 = ARMED.0.wrapping_add(RECEIVED.k1 as u16);
pub const KEY2_ORIGIN: u16 = ARMED.1.wrapping_add(RECEIVED.k2 as u16) << 1;

#[derive(Clone, Debug)]
pub struct FlowGuard {
    enabled: bool,
    write_key1: u16,
    write_key2: u16,
    key_test1: u16,
    key_test2: u16,
}

impl FlowGuard {
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            write_key1: ARMED.0,
            write_key2: ARMED.1,
            key_test1: SENTINEL.0,
            key_test2: SENTINEL.1,
        }
    }

    /// Reset the write keys at the top of each command loop iteration.
    pub fn arm(&mut self) {
        (self.write_key1, self.write_key2) = ARMED;
    }

    pub fn step(&mut self, step: Step) {
        self.write_key1 = self.write_key1.wrapping_add(step.k1 as u16);
        self.write_key2 = self.write_key2.wrapping_add(step.k2 as u16);
    }

    /// Mix the request address into the keys; done once per dispatched command.
    pub fn fold_address(&mut self, address: u32) {
        self.write_key1 |= address as u16;
        self.write_key2 <<= 1;
    }

    /// Key pair a path starting at `base` holds right after dispatch.
    pub fn origin(base: u32) -> (u16, u16) {
        (KEY1_ORIGIN | base as u16, KEY2_ORIGIN)
    }

    /// Load the pair the next commit must match.
    pub fn expect(&mut self, key1: u16, key2: u16) {
        self.key_test1 = key1;
        self.key_test2 = key2;
    }

    pub fn keys(&self) -> (u16, u16) {
        (self.write_key1, self.write_key2)
    }

    pub fn expected(&self) -> (u16, u16) {
        (self.key_test1, self.key_test2)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Apply the primitive's own step, run `commit` if the keys match, then
    /// drop the test pair back to its sentinel. The caller undoes `primitive`
    /// afterwards.
    pub fn attempt<F: FnOnce()>(&mut self, primitive: Step, commit: F) -> bool {
        self.step(primitive);
        let pass = !self.enabled
            || (self.write_key1 == self.key_test1 && self.write_key2 == self.key_test2);
        if pass {
            commit();
        } else {
            warn!(
                "guard refused commit: keys {=u16:#x}/{=u16:#x}",
                self.write_key1,
                self.write_key2
            );
        }
        (self.key_test1, self.key_test2) = SENTINEL;
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_constants() {
        assert_eq!(KEY1_ORIGIN, 0x0009);
        assert_eq!(KEY2_ORIGIN, 0xAAFE);
    }

    #[test]
    fn test_dispatch_path_reaches_origin() {
        let mut guard = FlowGuard::new(true);
        guard.arm();
        guard.step(RECEIVED);
        guard.fold_address(0x1234);
        assert_eq!(guard.keys(), FlowGuard::origin(0x1234));
    }

    #[test]
    fn test_unprimed_commit_is_refused() {
        let mut guard = FlowGuard::new(true);
        let mut ran = false;
        assert!(!guard.attempt(WRITE_COMMIT, || ran = true));
        assert!(!ran);
        assert_eq!(guard.expected(), SENTINEL);
    }

    #[test]
    fn test_matching_keys_commit_once() {
        let mut guard = FlowGuard::new(true);
        let (k1, k2) = guard.keys();
        guard.expect(k1.wrapping_sub(5), k2.wrapping_add(6));
        let mut count = 0;
        assert!(guard.attempt(WRITE_COMMIT, || count += 1));
        guard.step(WRITE_COMMIT.undo());
        // Test pair is back to sentinels: replaying the same commit fails.
        assert!(!guard.attempt(WRITE_COMMIT, || count += 1));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_disabled_guard_always_commits() {
        let mut guard = FlowGuard::new(false);
        let mut ran = false;
        assert!(guard.attempt(ERASE_COMMIT, || ran = true));
        assert!(ran);
    }

    #[test]
    fn test_step_undo() {
        let mut guard = FlowGuard::new(true);
        let before = guard.keys();
        guard.step(ERASE_COMMIT);
        guard.step(ERASE_COMMIT.undo());
        assert_eq!(guard.keys(), before);
    }
}
