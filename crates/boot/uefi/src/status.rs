//! UEFI status codes.

/// A UEFI status code.
///
/// The high bit marks errors; zero is success; positive values are
/// warnings.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EfiStatus(pub usize);

/// Sets the error bit of a status value.
const ERROR_BIT: usize = 1 << (usize::BITS - 1);

impl EfiStatus {
    /// The operation completed successfully.
    pub const SUCCESS: Self = Self(0);
    /// The image failed to load.
    pub const LOAD_ERROR: Self = Self(ERROR_BIT | 1);
    /// A parameter was incorrect.
    pub const INVALID_PARAMETER: Self = Self(ERROR_BIT | 2);
    /// The operation is not supported.
    pub const UNSUPPORTED: Self = Self(ERROR_BIT | 3);
    /// The buffer was not the proper size for the request.
    pub const BAD_BUFFER_SIZE: Self = Self(ERROR_BIT | 4);
    /// The buffer is too small; the required size is returned.
    pub const BUFFER_TOO_SMALL: Self = Self(ERROR_BIT | 5);
    /// There is no data pending upon return.
    pub const NOT_READY: Self = Self(ERROR_BIT | 6);
    /// The physical device reported an error.
    pub const DEVICE_ERROR: Self = Self(ERROR_BIT | 7);
    /// The device cannot be written to.
    pub const WRITE_PROTECTED: Self = Self(ERROR_BIT | 8);
    /// A resource has run out.
    pub const OUT_OF_RESOURCES: Self = Self(ERROR_BIT | 9);
    /// The item was not found.
    pub const NOT_FOUND: Self = Self(ERROR_BIT | 14);
    /// The operation timed out.
    pub const TIMEOUT: Self = Self(ERROR_BIT | 18);
    /// The security check failed (Secure Boot).
    pub const SECURITY_VIOLATION: Self = Self(ERROR_BIT | 26);

    /// `true` if the status is `SUCCESS`.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// `true` if the error bit is set.
    #[must_use]
    pub fn is_error(self) -> bool {
        self.0 & ERROR_BIT != 0
    }

    /// Converts to a `Result`, mapping every non-success value to `Err`.
    ///
    /// # Errors
    ///
    /// Returns `Err(self)` unless the status is `SUCCESS`.
    pub fn to_result(self) -> Result<(), EfiStatus> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }
}

impl core::fmt::Debug for EfiStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match *self {
            Self::SUCCESS => "SUCCESS",
            Self::LOAD_ERROR => "LOAD_ERROR",
            Self::INVALID_PARAMETER => "INVALID_PARAMETER",
            Self::UNSUPPORTED => "UNSUPPORTED",
            Self::BAD_BUFFER_SIZE => "BAD_BUFFER_SIZE",
            Self::BUFFER_TOO_SMALL => "BUFFER_TOO_SMALL",
            Self::NOT_READY => "NOT_READY",
            Self::DEVICE_ERROR => "DEVICE_ERROR",
            Self::WRITE_PROTECTED => "WRITE_PROTECTED",
            Self::OUT_OF_RESOURCES => "OUT_OF_RESOURCES",
            Self::NOT_FOUND => "NOT_FOUND",
            Self::TIMEOUT => "TIMEOUT",
            Self::SECURITY_VIOLATION => "SECURITY_VIOLATION",
            _ => return write!(f, "EfiStatus({:#x})", self.0),
        };
        f.write_str(name)
    }
}
