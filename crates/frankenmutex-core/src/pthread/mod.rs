//! POSIX threads: the mutex family.
//!
//! Implements `<pthread.h>` mutex and mutex-attribute objects on top of the
//! membrane's slot latch, thread identity, cancellation and yield primitives.

pub mod error;
pub mod mutex;
pub mod mutex_contract;
pub mod mutexattr;

pub use error::{MutexError, errno_result};
pub use mutex::{MutexGuard, MutexHandle, MutexSnapshot, RecordSnapshot};
pub use mutex_contract::{
    MutexContractOp, MutexContractOutcome, MutexContractState, mutex_contract_transition,
};
pub use mutexattr::{
    MutexAttr, MutexAttrHandle, MutexType, PROCESS_SHARED_SUPPORTED, PTHREAD_MUTEX_DEFAULT,
    PTHREAD_MUTEX_ERRORCHECK, PTHREAD_MUTEX_NORMAL, PTHREAD_MUTEX_RECURSIVE,
    PTHREAD_PROCESS_PRIVATE, PTHREAD_PROCESS_SHARED, SharingMode, valid_mutex_type,
};
