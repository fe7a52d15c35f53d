use std::num::NonZeroU8;
use std::{fmt, ops};

/// Readiness categories a [`Socket`] asks the [`Selector`] to watch.
///
/// An interest only declares what the next wait should look for; the outcome
/// of the wait lands in the socket's readiness flags. `Interest` is never
/// empty; a socket that should not be watched carries `None` instead.
///
/// The size of `Option<Interest>` is identical to `Interest` itself.
///
/// ```
/// use std::mem::size_of;
/// use muxio::Interest;
///
/// assert_eq!(size_of::<Option<Interest>>(), size_of::<Interest>());
/// ```
///
/// [`Socket`]: crate::Socket
/// [`Selector`]: crate::Selector
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Interest(NonZeroU8);

// These must be unique.
const ACCEPTABLE: u8 = 0b001;
const READABLE: u8 = 0b010;
const WRITABLE: u8 = 0b100;

impl Interest {
    /// Interest in a listening socket having a connection to accept.
    pub const ACCEPTABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(ACCEPTABLE) });

    /// Interest in readable readiness.
    pub const READABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(READABLE) });

    /// Interest in writable readiness.
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(WRITABLE) });

    /// Add together two `Interest`s.
    ///
    /// This does the same thing as the `BitOr` implementation, but is a
    /// constant function.
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, other: Interest) -> Interest {
        Interest(unsafe { NonZeroU8::new_unchecked(self.0.get() | other.0.get()) })
    }

    /// Removes `other` from `self`, returning `None` if nothing is left.
    pub fn remove(self, other: Interest) -> Option<Interest> {
        NonZeroU8::new(self.0.get() & !other.0.get()).map(Interest)
    }

    /// Returns true if the value includes acceptable interest.
    pub const fn is_acceptable(self) -> bool {
        (self.0.get() & ACCEPTABLE) != 0
    }

    /// Returns true if the value includes readable interest.
    pub const fn is_readable(self) -> bool {
        (self.0.get() & READABLE) != 0
    }

    /// Returns true if the value includes writable interest.
    pub const fn is_writable(self) -> bool {
        (self.0.get() & WRITABLE) != 0
    }
}

impl ops::BitOr for Interest {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        self.add(other)
    }
}

impl ops::BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        self.0 = (*self | other).0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        if self.is_acceptable() {
            write!(fmt, "ACCEPTABLE")?;
            one = true
        }
        if self.is_readable() {
            if one {
                write!(fmt, " | ")?
            }
            write!(fmt, "READABLE")?;
            one = true
        }
        if self.is_writable() {
            if one {
                write!(fmt, " | ")?
            }
            write!(fmt, "WRITABLE")?;
            one = true
        }
        debug_assert!(one, "printing empty interests");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Interest;

    #[test]
    fn add_and_contains() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.is_readable());
        assert!(both.is_writable());
        assert!(!both.is_acceptable());
    }

    #[test]
    fn remove_to_empty() {
        let r = Interest::READABLE;
        assert_eq!(r.remove(Interest::WRITABLE), Some(r));
        assert_eq!(r.remove(Interest::READABLE), None);
    }

    #[test]
    fn debug_render() {
        let all = Interest::ACCEPTABLE | Interest::READABLE | Interest::WRITABLE;
        assert_eq!(format!("{:?}", all), "ACCEPTABLE | READABLE | WRITABLE");
    }
}
