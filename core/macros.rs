/// Defines read accessors for bit fields of a value with a `raw()` method.
///
/// ```ignore
/// impl ModRm {
///     impl_field! {
///         rm = 0, 3, u8;
///         is_reg = 6, 2, bool, |m| m == 3;
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_field {
    ($($vis:vis $name:ident = $pos:expr, $len:expr, $ret:tt $(, $map:expr)?;)*) => ($(
        $crate::impl_field!(impl $vis $name, $ret, $pos, $len $(, $map)?);
    )*);
    (impl $vis:vis $name:ident, bool, $pos:expr, $len:expr $(, $map:expr)?) => (
        #[inline(always)]
        $vis fn $name(&self) -> bool {
            let ret: u32 = $crate::utils::zextract(self.raw() as u32, $pos, $len);
            $(let ret = ($map)(ret) as u32;)?
            ret != 0
        }
    );
    (impl $vis:vis $name:ident, $ret:ty, $pos:expr, $len:expr $(, $map:expr)?) => (
        #[inline(always)]
        $vis fn $name(&self) -> $ret {
            let ret: u32 = $crate::utils::zextract(self.raw() as u32, $pos, $len);
            $(let ret = ($map)(ret);)?
            ret as $ret
        }
    );
}
pub use impl_field;

/// Defines a fieldless enum whose variants are numbered in declaration
/// order, together with a table of all variants and their names.
#[macro_export]
macro_rules! define_enum {
    ($(#[$attr:meta])* $vis:vis enum $name:ident: $repr:ident {
        $($variant:ident),+ $(,)?
    }) => (
        $(#[$attr])*
        #[repr($repr)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const COUNT: usize = Self::ALL.len();

            pub fn from_index(index: usize) -> Option<Self> {
                Self::ALL.get(index).copied()
            }

            pub const fn index(&self) -> usize {
                *self as usize
            }

            pub fn name(&self) -> &'static str {
                const NAMES: &[&str] = &[$(stringify!($variant)),+];
                NAMES[*self as usize]
            }
        }
    );
}
pub use define_enum;

#[cfg(test)]
mod tests {
    struct Raw(u8);

    impl Raw {
        fn raw(&self) -> u8 {
            self.0
        }

        crate::impl_field! {
            low = 0, 3, u8;
            high = 6, 2, u8;
            is_high_set = 6, 2, bool, |m| m == 3;
        }
    }

    crate::define_enum! {
        enum Color: u8 {
            Red,
            Green,
            Blue,
        }
    }

    #[test]
    fn field() {
        let raw = Raw(0b1100_0101);
        assert_eq!(raw.low(), 5);
        assert_eq!(raw.high(), 3);
        assert!(raw.is_high_set());
        assert!(!Raw(0b0100_0000).is_high_set());
    }

    #[test]
    fn enums() {
        assert_eq!(Color::COUNT, 3);
        assert_eq!(Color::from_index(2), Some(Color::Blue));
        assert_eq!(Color::from_index(3), None);
        assert_eq!(Color::Green.index(), 1);
        assert_eq!(Color::Green.name(), "Green");
    }
}
