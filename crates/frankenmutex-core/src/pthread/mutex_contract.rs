//! Clean-room transition contract for the mutex family.
//!
//! An abstract, single-observer model of what each operation does to a mutex
//! in a given state. The conformance matrix replays every cell against the
//! real [`MutexHandle`](super::MutexHandle) and reports any divergence.

use crate::errno;

use super::mutexattr::{MutexType, valid_mutex_type};

/// Phase-scoped mutex state abstraction used for clean-room transition contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexContractState {
    /// Empty handle: never constructed.
    Uninitialized,
    /// Lazy-init sentinel, not yet materialized.
    StaticInitializer,
    /// Mutex is constructed and currently unlocked.
    Unlocked,
    /// Mutex is locked by the calling thread.
    LockedBySelf,
    /// Mutex is locked by a different thread.
    LockedByOther,
    /// Mutex has been destroyed and must be re-created before reuse.
    Destroyed,
}

impl MutexContractState {
    pub const ALL: [Self; 6] = [
        Self::Uninitialized,
        Self::StaticInitializer,
        Self::Unlocked,
        Self::LockedBySelf,
        Self::LockedByOther,
        Self::Destroyed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::StaticInitializer => "static_initializer",
            Self::Unlocked => "unlocked",
            Self::LockedBySelf => "locked_by_self",
            Self::LockedByOther => "locked_by_other",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Contract-level operation set for mutex transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexContractOp {
    Init,
    Lock,
    TryLock,
    Unlock,
    Destroy,
}

impl MutexContractOp {
    pub const ALL: [Self; 5] = [
        Self::Init,
        Self::Lock,
        Self::TryLock,
        Self::Unlock,
        Self::Destroy,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Lock => "lock",
            Self::TryLock => "trylock",
            Self::Unlock => "unlock",
            Self::Destroy => "destroy",
        }
    }
}

/// Deterministic transition result for a contract operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexContractOutcome {
    /// Next abstract state after applying the operation.
    pub next: MutexContractState,
    /// POSIX errno-style result (0 on success).
    pub errno: i32,
    /// Whether the operation may block awaiting progress by another thread.
    pub blocks: bool,
}

const fn outcome(next: MutexContractState, errno: i32) -> MutexContractOutcome {
    MutexContractOutcome {
        next,
        errno,
        blocks: false,
    }
}

/// Transition contract for NORMAL/RECURSIVE/ERRORCHECK/DEFAULT mutexes.
///
/// `Init` always (re)constructs an unlocked private mutex. `Default` follows
/// `Recursive`. Try-lock never recurses.
#[must_use]
pub const fn mutex_contract_transition(
    kind: i32,
    state: MutexContractState,
    op: MutexContractOp,
) -> MutexContractOutcome {
    use MutexContractOp as Op;
    use MutexContractState as St;

    if !valid_mutex_type(kind) {
        return outcome(state, errno::EINVAL);
    }

    match (state, op) {
        (_, Op::Init) => outcome(St::Unlocked, 0),
        (St::Uninitialized | St::Destroyed, _) => outcome(state, errno::EINVAL),
        (St::StaticInitializer | St::Unlocked, Op::Lock | Op::TryLock) => {
            outcome(St::LockedBySelf, 0)
        }
        (St::StaticInitializer | St::Unlocked, Op::Destroy) => outcome(St::Destroyed, 0),
        (St::StaticInitializer, Op::Unlock) => outcome(state, errno::EINVAL),
        (St::Unlocked, Op::Unlock) => outcome(state, errno::EPERM),
        (St::LockedByOther, Op::Lock) => MutexContractOutcome {
            next: St::LockedByOther,
            errno: 0,
            blocks: true,
        },
        (St::LockedByOther, Op::TryLock | Op::Destroy) => outcome(state, errno::EBUSY),
        (St::LockedByOther, Op::Unlock) => outcome(state, errno::EPERM),
        (St::LockedBySelf, Op::TryLock | Op::Destroy) => outcome(state, errno::EBUSY),
        (St::LockedBySelf, Op::Unlock) => outcome(St::Unlocked, 0),
        (St::LockedBySelf, Op::Lock) => match MutexType::from_raw(kind) {
            Some(MutexType::ErrorCheck) => outcome(state, errno::EDEADLK),
            Some(MutexType::Normal) => MutexContractOutcome {
                next: St::LockedBySelf,
                errno: 0,
                blocks: true,
            },
            _ => outcome(state, 0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pthread::mutexattr::{
        PTHREAD_MUTEX_DEFAULT, PTHREAD_MUTEX_ERRORCHECK, PTHREAD_MUTEX_NORMAL,
        PTHREAD_MUTEX_RECURSIVE,
    };

    #[test]
    fn contract_normal_relock_blocks() {
        let outcome = mutex_contract_transition(
            PTHREAD_MUTEX_NORMAL,
            MutexContractState::LockedBySelf,
            MutexContractOp::Lock,
        );
        assert_eq!(outcome.next, MutexContractState::LockedBySelf);
        assert_eq!(outcome.errno, 0);
        assert!(outcome.blocks);
    }

    #[test]
    fn contract_errorcheck_relock_is_edeadlk() {
        let outcome = mutex_contract_transition(
            PTHREAD_MUTEX_ERRORCHECK,
            MutexContractState::LockedBySelf,
            MutexContractOp::Lock,
        );
        assert_eq!(outcome.next, MutexContractState::LockedBySelf);
        assert_eq!(outcome.errno, errno::EDEADLK);
        assert!(!outcome.blocks);
    }

    #[test]
    fn contract_recursive_and_default_relock_succeed_nonblocking() {
        for kind in [PTHREAD_MUTEX_RECURSIVE, PTHREAD_MUTEX_DEFAULT] {
            let outcome = mutex_contract_transition(
                kind,
                MutexContractState::LockedBySelf,
                MutexContractOp::Lock,
            );
            assert_eq!(outcome.next, MutexContractState::LockedBySelf);
            assert_eq!(outcome.errno, 0);
            assert!(!outcome.blocks);
        }
    }

    #[test]
    fn contract_trylock_never_recurses() {
        for kind in 0..=3 {
            let outcome = mutex_contract_transition(
                kind,
                MutexContractState::LockedBySelf,
                MutexContractOp::TryLock,
            );
            assert_eq!(outcome.errno, errno::EBUSY);
        }
    }

    #[test]
    fn contract_unlock_locked_by_other_is_eperm() {
        let outcome = mutex_contract_transition(
            PTHREAD_MUTEX_NORMAL,
            MutexContractState::LockedByOther,
            MutexContractOp::Unlock,
        );
        assert_eq!(outcome.next, MutexContractState::LockedByOther);
        assert_eq!(outcome.errno, errno::EPERM);
    }

    #[test]
    fn contract_destroy_while_locked_is_ebusy() {
        for state in [
            MutexContractState::LockedByOther,
            MutexContractState::LockedBySelf,
        ] {
            let outcome =
                mutex_contract_transition(PTHREAD_MUTEX_NORMAL, state, MutexContractOp::Destroy);
            assert_eq!(outcome.next, state);
            assert_eq!(outcome.errno, errno::EBUSY);
        }
    }

    #[test]
    fn contract_sentinel_initializes_implicitly() {
        for op in [MutexContractOp::Lock, MutexContractOp::TryLock] {
            let outcome = mutex_contract_transition(
                PTHREAD_MUTEX_DEFAULT,
                MutexContractState::StaticInitializer,
                op,
            );
            assert_eq!(outcome.next, MutexContractState::LockedBySelf);
            assert_eq!(outcome.errno, 0);
        }
        let unlock = mutex_contract_transition(
            PTHREAD_MUTEX_DEFAULT,
            MutexContractState::StaticInitializer,
            MutexContractOp::Unlock,
        );
        assert_eq!(unlock.errno, errno::EINVAL);
    }

    #[test]
    fn contract_destroyed_and_uninitialized_reject_everything_but_init() {
        for state in [
            MutexContractState::Uninitialized,
            MutexContractState::Destroyed,
        ] {
            for op in MutexContractOp::ALL {
                let outcome = mutex_contract_transition(PTHREAD_MUTEX_NORMAL, state, op);
                if op == MutexContractOp::Init {
                    assert_eq!(outcome.next, MutexContractState::Unlocked);
                    assert_eq!(outcome.errno, 0);
                } else {
                    assert_eq!(outcome.next, state);
                    assert_eq!(outcome.errno, errno::EINVAL);
                }
            }
        }
    }

    #[test]
    fn contract_init_always_reconstructs() {
        for state in MutexContractState::ALL {
            let outcome =
                mutex_contract_transition(PTHREAD_MUTEX_RECURSIVE, state, MutexContractOp::Init);
            assert_eq!(outcome.next, MutexContractState::Unlocked);
            assert_eq!(outcome.errno, 0);
        }
    }

    #[test]
    fn contract_invalid_kind_is_einval_everywhere() {
        for state in MutexContractState::ALL {
            for op in MutexContractOp::ALL {
                let outcome = mutex_contract_transition(42, state, op);
                assert_eq!(outcome.next, state);
                assert_eq!(outcome.errno, errno::EINVAL);
            }
        }
    }
}
