//! Mutex attribute objects.
//!
//! An attribute object carries the two knobs consulted by
//! [`MutexHandle::create`](super::MutexHandle::create): the locking discipline
//! and the sharing mode. [`MutexAttrHandle`] is the owning, nullable handle the
//! C-style surface works with; [`MutexAttr`] is the plain value behind it.

use frankenmutex_membrane::try_box;

use super::error::MutexError;

// ---------------------------------------------------------------------------
// Raw constants
// ---------------------------------------------------------------------------

/// No error checking; a relock by the owner never returns.
pub const PTHREAD_MUTEX_NORMAL: i32 = 0;
/// The owner may relock; each lock needs a matching unlock.
pub const PTHREAD_MUTEX_RECURSIVE: i32 = 1;
/// A relock by the owner reports `EDEADLK`.
pub const PTHREAD_MUTEX_ERRORCHECK: i32 = 2;
/// Resolved to [`PTHREAD_MUTEX_RECURSIVE`] when a mutex is created.
pub const PTHREAD_MUTEX_DEFAULT: i32 = 3;

pub const PTHREAD_PROCESS_PRIVATE: i32 = 0;
pub const PTHREAD_PROCESS_SHARED: i32 = 1;

/// Whether this build declares process-shared mutex support.
pub const PROCESS_SHARED_SUPPORTED: bool = cfg!(feature = "process-shared");

/// Returns true if `kind` is one of the four recognized mutex types.
#[must_use]
pub const fn valid_mutex_type(kind: i32) -> bool {
    matches!(
        kind,
        PTHREAD_MUTEX_NORMAL
            | PTHREAD_MUTEX_RECURSIVE
            | PTHREAD_MUTEX_ERRORCHECK
            | PTHREAD_MUTEX_DEFAULT
    )
}

// ---------------------------------------------------------------------------
// Typed values
// ---------------------------------------------------------------------------

/// Locking discipline of a mutex.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexType {
    Normal,
    Recursive,
    ErrorCheck,
    #[default]
    Default,
}

impl MutexType {
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            PTHREAD_MUTEX_NORMAL => Some(Self::Normal),
            PTHREAD_MUTEX_RECURSIVE => Some(Self::Recursive),
            PTHREAD_MUTEX_ERRORCHECK => Some(Self::ErrorCheck),
            PTHREAD_MUTEX_DEFAULT => Some(Self::Default),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Normal => PTHREAD_MUTEX_NORMAL,
            Self::Recursive => PTHREAD_MUTEX_RECURSIVE,
            Self::ErrorCheck => PTHREAD_MUTEX_ERRORCHECK,
            Self::Default => PTHREAD_MUTEX_DEFAULT,
        }
    }

    /// The discipline a mutex created with this type actually runs.
    /// `Default` resolves to `Recursive`; every other type is unchanged.
    #[must_use]
    pub const fn resolve(self) -> Self {
        match self {
            Self::Default => Self::Recursive,
            other => other,
        }
    }

    /// Returns true if the owner may relock without blocking.
    #[must_use]
    pub const fn is_recursive(self) -> bool {
        matches!(self.resolve(), Self::Recursive)
    }

    /// Stable label used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Recursive => "recursive",
            Self::ErrorCheck => "errorcheck",
            Self::Default => "default",
        }
    }
}

/// Whether a mutex may be used across processes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharingMode {
    #[default]
    Private,
    Shared,
}

impl SharingMode {
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            PTHREAD_PROCESS_PRIVATE => Some(Self::Private),
            PTHREAD_PROCESS_SHARED => Some(Self::Shared),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Private => PTHREAD_PROCESS_PRIVATE,
            Self::Shared => PTHREAD_PROCESS_SHARED,
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute object
// ---------------------------------------------------------------------------

/// Mutex creation attributes. Defaults to `(Default, Private)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexAttr {
    kind: MutexType,
    sharing: SharingMode,
}

impl MutexAttr {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kind: MutexType::Default,
            sharing: SharingMode::Private,
        }
    }

    #[must_use]
    pub const fn with_kind(kind: MutexType) -> Self {
        Self {
            kind,
            sharing: SharingMode::Private,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MutexType {
        self.kind
    }

    pub fn set_kind(&mut self, kind: MutexType) {
        self.kind = kind;
    }

    #[must_use]
    pub const fn sharing(&self) -> SharingMode {
        self.sharing
    }

    /// Store a sharing mode.
    ///
    /// Without process-shared support, `Shared` is refused with
    /// [`MutexError::NotSupported`] and the stored mode becomes `Private`.
    pub fn set_sharing(&mut self, mode: SharingMode) -> Result<(), MutexError> {
        match mode {
            SharingMode::Shared if !PROCESS_SHARED_SUPPORTED => {
                self.sharing = SharingMode::Private;
                Err(MutexError::NotSupported)
            }
            mode => {
                self.sharing = mode;
                Ok(())
            }
        }
    }
}

/// Owning, nullable handle to a heap attribute object.
///
/// The null handle is what [`MutexAttrHandle::destroy`] leaves behind; every
/// accessor on it fails with [`MutexError::InvalidArgument`].
#[derive(Debug, Default)]
pub struct MutexAttrHandle {
    attr: Option<Box<MutexAttr>>,
}

impl MutexAttrHandle {
    #[must_use]
    pub const fn null() -> Self {
        Self { attr: None }
    }

    /// Allocate an attribute object holding `(Default, Private)`.
    pub fn create() -> Result<Self, MutexError> {
        let attr = try_box(MutexAttr::new())?;
        Ok(Self { attr: Some(attr) })
    }

    /// Adopt an attribute object released by [`MutexAttrHandle::into_box`].
    #[must_use]
    pub fn from_box(attr: Box<MutexAttr>) -> Self {
        Self { attr: Some(attr) }
    }

    /// Give up ownership of the attribute object, if any.
    #[must_use]
    pub fn into_box(self) -> Option<Box<MutexAttr>> {
        self.attr
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.attr.is_none()
    }

    /// Release the attribute object and null the handle.
    pub fn destroy(&mut self) -> Result<(), MutexError> {
        self.attr
            .take()
            .map(drop)
            .ok_or(MutexError::InvalidArgument)
    }

    /// The attribute value, if the handle is live.
    pub fn get(&self) -> Result<&MutexAttr, MutexError> {
        self.attr.as_deref().ok_or(MutexError::InvalidArgument)
    }

    fn get_mut(&mut self) -> Result<&mut MutexAttr, MutexError> {
        self.attr.as_deref_mut().ok_or(MutexError::InvalidArgument)
    }

    /// Stored sharing mode.
    ///
    /// Callers that must produce an output value on failure report
    /// `SharingMode::default()` (`Private`).
    pub fn sharing(&self) -> Result<SharingMode, MutexError> {
        self.get().map(MutexAttr::sharing)
    }

    /// Set the sharing mode from its raw value.
    pub fn set_sharing(&mut self, raw: i32) -> Result<(), MutexError> {
        let attr = self.get_mut()?;
        let mode = SharingMode::from_raw(raw).ok_or(MutexError::InvalidArgument)?;
        attr.set_sharing(mode)
    }

    pub fn kind(&self) -> Result<MutexType, MutexError> {
        self.get().map(MutexAttr::kind)
    }

    /// Set the mutex type from its raw value.
    pub fn set_kind(&mut self, raw: i32) -> Result<(), MutexError> {
        let attr = self.get_mut()?;
        let kind = MutexType::from_raw(raw).ok_or(MutexError::InvalidArgument)?;
        attr.set_kind(kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frankenmutex_membrane::alloc::inject_alloc_failures;

    #[test]
    fn mutex_type_constants() {
        assert_eq!(PTHREAD_MUTEX_NORMAL, 0);
        assert_eq!(PTHREAD_MUTEX_RECURSIVE, 1);
        assert_eq!(PTHREAD_MUTEX_ERRORCHECK, 2);
        assert_eq!(PTHREAD_MUTEX_DEFAULT, 3);
        assert_eq!(PTHREAD_PROCESS_PRIVATE, 0);
        assert_eq!(PTHREAD_PROCESS_SHARED, 1);
    }

    #[test]
    fn valid_mutex_type_check() {
        for kind in 0..=3 {
            assert!(valid_mutex_type(kind));
            assert_eq!(MutexType::from_raw(kind).map(MutexType::as_raw), Some(kind));
        }
        assert!(!valid_mutex_type(4));
        assert!(!valid_mutex_type(-1));
        assert_eq!(MutexType::from_raw(4), None);
    }

    #[test]
    fn set_kind_extremes_are_rejected_not_coerced() {
        let mut attr = MutexAttrHandle::create().unwrap();
        attr.set_kind(PTHREAD_MUTEX_ERRORCHECK).unwrap();
        for raw in [i32::MIN, -1, 4, i32::MAX] {
            assert_eq!(attr.set_kind(raw), Err(MutexError::InvalidArgument));
            assert_eq!(attr.kind(), Ok(MutexType::ErrorCheck));
        }
    }

    #[test]
    fn default_resolves_to_recursive() {
        assert_eq!(MutexType::Default.resolve(), MutexType::Recursive);
        assert_eq!(MutexType::Normal.resolve(), MutexType::Normal);
        assert_eq!(MutexType::ErrorCheck.resolve(), MutexType::ErrorCheck);
        assert!(MutexType::Default.is_recursive());
        assert!(MutexType::Recursive.is_recursive());
        assert!(!MutexType::Normal.is_recursive());
        assert!(!MutexType::ErrorCheck.is_recursive());
    }

    #[test]
    fn fresh_attr_is_default_private() {
        let attr = MutexAttrHandle::create().unwrap();
        assert_eq!(attr.kind(), Ok(MutexType::Default));
        assert_eq!(attr.sharing(), Ok(SharingMode::Private));
    }

    #[test]
    fn create_reports_out_of_memory() {
        inject_alloc_failures(1);
        assert_eq!(
            MutexAttrHandle::create().unwrap_err(),
            MutexError::OutOfMemory
        );
        assert!(MutexAttrHandle::create().is_ok());
    }

    #[test]
    fn destroy_nulls_handle_and_second_destroy_fails() {
        let mut attr = MutexAttrHandle::create().unwrap();
        assert_eq!(attr.destroy(), Ok(()));
        assert!(attr.is_null());
        assert_eq!(attr.destroy(), Err(MutexError::InvalidArgument));
    }

    #[test]
    fn box_round_trip_keeps_the_object() {
        let mut attr = MutexAttrHandle::create().unwrap();
        attr.set_kind(PTHREAD_MUTEX_NORMAL).unwrap();
        let boxed = attr.into_box().unwrap();
        let mut attr = MutexAttrHandle::from_box(boxed);
        assert_eq!(attr.kind(), Ok(MutexType::Normal));
        assert_eq!(attr.destroy(), Ok(()));
        assert!(attr.into_box().is_none());
    }

    #[test]
    fn null_handle_rejects_every_accessor() {
        let mut attr = MutexAttrHandle::null();
        assert_eq!(attr.kind(), Err(MutexError::InvalidArgument));
        assert_eq!(attr.sharing(), Err(MutexError::InvalidArgument));
        assert_eq!(
            attr.set_kind(PTHREAD_MUTEX_NORMAL),
            Err(MutexError::InvalidArgument)
        );
        assert_eq!(
            attr.set_sharing(PTHREAD_PROCESS_PRIVATE),
            Err(MutexError::InvalidArgument)
        );
        assert_eq!(attr.sharing().unwrap_or_default(), SharingMode::Private);
    }

    #[test]
    fn set_kind_accepts_all_four_and_rejects_others() {
        let mut attr = MutexAttrHandle::create().unwrap();
        for (raw, kind) in [
            (PTHREAD_MUTEX_NORMAL, MutexType::Normal),
            (PTHREAD_MUTEX_RECURSIVE, MutexType::Recursive),
            (PTHREAD_MUTEX_ERRORCHECK, MutexType::ErrorCheck),
            (PTHREAD_MUTEX_DEFAULT, MutexType::Default),
        ] {
            assert_eq!(attr.set_kind(raw), Ok(()));
            assert_eq!(attr.kind(), Ok(kind));
        }
        assert_eq!(attr.set_kind(7), Err(MutexError::InvalidArgument));
        assert_eq!(attr.kind(), Ok(MutexType::Default));
    }

    #[test]
    fn set_sharing_rejects_unknown_mode() {
        let mut attr = MutexAttrHandle::create().unwrap();
        assert_eq!(attr.set_sharing(2), Err(MutexError::InvalidArgument));
        assert_eq!(attr.set_sharing(PTHREAD_PROCESS_PRIVATE), Ok(()));
        assert_eq!(attr.sharing(), Ok(SharingMode::Private));
    }

    #[cfg(not(feature = "process-shared"))]
    #[test]
    fn shared_is_refused_and_coerced_to_private() {
        let mut attr = MutexAttrHandle::create().unwrap();
        assert_eq!(
            attr.set_sharing(PTHREAD_PROCESS_SHARED),
            Err(MutexError::NotSupported)
        );
        assert_eq!(attr.sharing(), Ok(SharingMode::Private));
    }

    #[cfg(feature = "process-shared")]
    #[test]
    fn shared_is_stored_when_supported() {
        let mut attr = MutexAttrHandle::create().unwrap();
        assert_eq!(attr.set_sharing(PTHREAD_PROCESS_SHARED), Ok(()));
        assert_eq!(attr.sharing(), Ok(SharingMode::Shared));
    }
}
