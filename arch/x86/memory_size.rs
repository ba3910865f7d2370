//! Memory operand shapes.

use x86_decode_core::define_enum;

define_enum! {
    /// Size and element layout of a memory operand.
    ///
    /// `Packed*` variants describe a whole vector in memory, `Broadcast*`
    /// variants a single element which is replicated across the vector.
    #[allow(non_camel_case_types)]
    pub enum MemorySize: u8 {
        Unknown,
        UInt8,
        UInt16,
        UInt32,
        UInt52,
        UInt64,
        UInt128,
        UInt256,
        UInt512,
        Int8,
        Int16,
        Int32,
        Int64,
        Int128,
        Int256,
        Int512,
        SegPtr16,
        SegPtr32,
        SegPtr64,
        WordOffset,
        DwordOffset,
        QwordOffset,
        Bound16_WordWord,
        Bound32_DwordDword,
        Bnd32,
        Bnd64,
        Fword5,
        Fword6,
        Fword10,
        Float16,
        Float32,
        Float64,
        Float80,
        Float128,
        BFloat16,
        FpuEnv14,
        FpuEnv28,
        FpuState94,
        FpuState108,
        Fxsave_512Byte,
        Fxsave64_512Byte,
        Xsave,
        Xsave64,
        Bcd,
        Packed16_UInt8,
        Packed16_Int8,
        Packed32_UInt8,
        Packed32_Int8,
        Packed32_UInt16,
        Packed32_Int16,
        Packed32_BFloat16,
        Packed64_UInt8,
        Packed64_Int8,
        Packed64_UInt16,
        Packed64_Int16,
        Packed64_UInt32,
        Packed64_Int32,
        Packed64_Float16,
        Packed64_Float32,
        Packed128_UInt8,
        Packed128_Int8,
        Packed128_UInt16,
        Packed128_Int16,
        Packed128_UInt32,
        Packed128_Int32,
        Packed128_UInt52,
        Packed128_UInt64,
        Packed128_Int64,
        Packed128_Float16,
        Packed128_Float32,
        Packed128_Float64,
        Packed128_2xBFloat16,
        Packed256_UInt8,
        Packed256_Int8,
        Packed256_UInt16,
        Packed256_Int16,
        Packed256_UInt32,
        Packed256_Int32,
        Packed256_UInt52,
        Packed256_UInt64,
        Packed256_Int64,
        Packed256_UInt128,
        Packed256_Int128,
        Packed256_Float16,
        Packed256_Float32,
        Packed256_Float64,
        Packed256_Float128,
        Packed256_2xBFloat16,
        Packed512_UInt8,
        Packed512_Int8,
        Packed512_UInt16,
        Packed512_Int16,
        Packed512_UInt32,
        Packed512_Int32,
        Packed512_UInt52,
        Packed512_UInt64,
        Packed512_Int64,
        Packed512_UInt128,
        Packed512_Float32,
        Packed512_Float64,
        Packed512_2xBFloat16,
        Broadcast64_UInt32,
        Broadcast64_Int32,
        Broadcast64_Float32,
        Broadcast128_UInt32,
        Broadcast128_Int32,
        Broadcast128_UInt52,
        Broadcast128_UInt64,
        Broadcast128_Int64,
        Broadcast128_Float32,
        Broadcast128_Float64,
        Broadcast256_UInt32,
        Broadcast256_Int32,
        Broadcast256_UInt52,
        Broadcast256_UInt64,
        Broadcast256_Int64,
        Broadcast256_Float32,
        Broadcast256_Float64,
        Broadcast512_UInt32,
        Broadcast512_Int32,
        Broadcast512_UInt52,
        Broadcast512_UInt64,
        Broadcast512_Int64,
        Broadcast512_Float32,
        Broadcast512_Float64,
        Broadcast128_2xInt16,
        Broadcast256_2xInt16,
        Broadcast512_2xInt16,
        Broadcast128_2xUInt32,
        Broadcast256_2xUInt32,
        Broadcast512_2xUInt32,
        Broadcast128_2xInt32,
        Broadcast256_2xInt32,
        Broadcast512_2xInt32,
        Broadcast128_2xBFloat16,
        Broadcast256_2xBFloat16,
        Broadcast512_2xBFloat16,
    }
}

#[derive(Copy, Clone)]
struct Info {
    size: u16,
    element_size: u16,
    element_type: MemorySize,
    signed: bool,
    broadcast: bool,
}

const fn info(
    size: u16,
    element_size: u16,
    element_type: MemorySize,
    signed: bool,
    broadcast: bool,
) -> Info {
    Info {
        size,
        element_size,
        element_type,
        signed,
        broadcast,
    }
}

#[rustfmt::skip]
static INFO: [Info; MemorySize::COUNT] = [
    info(0, 0, MemorySize::Unknown, false, false),
    info(1, 1, MemorySize::UInt8, false, false),
    info(2, 2, MemorySize::UInt16, false, false),
    info(4, 4, MemorySize::UInt32, false, false),
    info(8, 8, MemorySize::UInt52, false, false),
    info(8, 8, MemorySize::UInt64, false, false),
    info(16, 16, MemorySize::UInt128, false, false),
    info(32, 32, MemorySize::UInt256, false, false),
    info(64, 64, MemorySize::UInt512, false, false),
    info(1, 1, MemorySize::Int8, true, false),
    info(2, 2, MemorySize::Int16, true, false),
    info(4, 4, MemorySize::Int32, true, false),
    info(8, 8, MemorySize::Int64, true, false),
    info(16, 16, MemorySize::Int128, true, false),
    info(32, 32, MemorySize::Int256, true, false),
    info(64, 64, MemorySize::Int512, true, false),
    info(4, 4, MemorySize::SegPtr16, false, false),
    info(6, 6, MemorySize::SegPtr32, false, false),
    info(10, 10, MemorySize::SegPtr64, false, false),
    info(2, 2, MemorySize::WordOffset, false, false),
    info(4, 4, MemorySize::DwordOffset, false, false),
    info(8, 8, MemorySize::QwordOffset, false, false),
    info(4, 4, MemorySize::Bound16_WordWord, false, false),
    info(8, 8, MemorySize::Bound32_DwordDword, false, false),
    info(8, 8, MemorySize::Bnd32, false, false),
    info(16, 16, MemorySize::Bnd64, false, false),
    info(5, 5, MemorySize::Fword5, false, false),
    info(6, 6, MemorySize::Fword6, false, false),
    info(10, 10, MemorySize::Fword10, false, false),
    info(2, 2, MemorySize::Float16, true, false),
    info(4, 4, MemorySize::Float32, true, false),
    info(8, 8, MemorySize::Float64, true, false),
    info(10, 10, MemorySize::Float80, true, false),
    info(16, 16, MemorySize::Float128, true, false),
    info(2, 2, MemorySize::BFloat16, true, false),
    info(14, 14, MemorySize::FpuEnv14, false, false),
    info(28, 28, MemorySize::FpuEnv28, false, false),
    info(94, 94, MemorySize::FpuState94, false, false),
    info(108, 108, MemorySize::FpuState108, false, false),
    info(512, 512, MemorySize::Fxsave_512Byte, false, false),
    info(512, 512, MemorySize::Fxsave64_512Byte, false, false),
    info(0, 0, MemorySize::Xsave, false, false),
    info(0, 0, MemorySize::Xsave64, false, false),
    info(10, 10, MemorySize::Bcd, true, false),
    info(2, 1, MemorySize::UInt8, false, false),
    info(2, 1, MemorySize::Int8, true, false),
    info(4, 1, MemorySize::UInt8, false, false),
    info(4, 1, MemorySize::Int8, true, false),
    info(4, 2, MemorySize::UInt16, false, false),
    info(4, 2, MemorySize::Int16, true, false),
    info(4, 2, MemorySize::BFloat16, true, false),
    info(8, 1, MemorySize::UInt8, false, false),
    info(8, 1, MemorySize::Int8, true, false),
    info(8, 2, MemorySize::UInt16, false, false),
    info(8, 2, MemorySize::Int16, true, false),
    info(8, 4, MemorySize::UInt32, false, false),
    info(8, 4, MemorySize::Int32, true, false),
    info(8, 2, MemorySize::Float16, true, false),
    info(8, 4, MemorySize::Float32, true, false),
    info(16, 1, MemorySize::UInt8, false, false),
    info(16, 1, MemorySize::Int8, true, false),
    info(16, 2, MemorySize::UInt16, false, false),
    info(16, 2, MemorySize::Int16, true, false),
    info(16, 4, MemorySize::UInt32, false, false),
    info(16, 4, MemorySize::Int32, true, false),
    info(16, 8, MemorySize::UInt52, false, false),
    info(16, 8, MemorySize::UInt64, false, false),
    info(16, 8, MemorySize::Int64, true, false),
    info(16, 2, MemorySize::Float16, true, false),
    info(16, 4, MemorySize::Float32, true, false),
    info(16, 8, MemorySize::Float64, true, false),
    info(16, 4, MemorySize::Packed32_BFloat16, true, false),
    info(32, 1, MemorySize::UInt8, false, false),
    info(32, 1, MemorySize::Int8, true, false),
    info(32, 2, MemorySize::UInt16, false, false),
    info(32, 2, MemorySize::Int16, true, false),
    info(32, 4, MemorySize::UInt32, false, false),
    info(32, 4, MemorySize::Int32, true, false),
    info(32, 8, MemorySize::UInt52, false, false),
    info(32, 8, MemorySize::UInt64, false, false),
    info(32, 8, MemorySize::Int64, true, false),
    info(32, 16, MemorySize::UInt128, false, false),
    info(32, 16, MemorySize::Int128, true, false),
    info(32, 2, MemorySize::Float16, true, false),
    info(32, 4, MemorySize::Float32, true, false),
    info(32, 8, MemorySize::Float64, true, false),
    info(32, 16, MemorySize::Float128, true, false),
    info(32, 4, MemorySize::Packed32_BFloat16, true, false),
    info(64, 1, MemorySize::UInt8, false, false),
    info(64, 1, MemorySize::Int8, true, false),
    info(64, 2, MemorySize::UInt16, false, false),
    info(64, 2, MemorySize::Int16, true, false),
    info(64, 4, MemorySize::UInt32, false, false),
    info(64, 4, MemorySize::Int32, true, false),
    info(64, 8, MemorySize::UInt52, false, false),
    info(64, 8, MemorySize::UInt64, false, false),
    info(64, 8, MemorySize::Int64, true, false),
    info(64, 16, MemorySize::UInt128, false, false),
    info(64, 4, MemorySize::Float32, true, false),
    info(64, 8, MemorySize::Float64, true, false),
    info(64, 4, MemorySize::Packed32_BFloat16, true, false),
    info(4, 4, MemorySize::UInt32, false, true),
    info(4, 4, MemorySize::Int32, true, true),
    info(4, 4, MemorySize::Float32, true, true),
    info(4, 4, MemorySize::UInt32, false, true),
    info(4, 4, MemorySize::Int32, true, true),
    info(8, 8, MemorySize::UInt52, false, true),
    info(8, 8, MemorySize::UInt64, false, true),
    info(8, 8, MemorySize::Int64, true, true),
    info(4, 4, MemorySize::Float32, true, true),
    info(8, 8, MemorySize::Float64, true, true),
    info(4, 4, MemorySize::UInt32, false, true),
    info(4, 4, MemorySize::Int32, true, true),
    info(8, 8, MemorySize::UInt52, false, true),
    info(8, 8, MemorySize::UInt64, false, true),
    info(8, 8, MemorySize::Int64, true, true),
    info(4, 4, MemorySize::Float32, true, true),
    info(8, 8, MemorySize::Float64, true, true),
    info(4, 4, MemorySize::UInt32, false, true),
    info(4, 4, MemorySize::Int32, true, true),
    info(8, 8, MemorySize::UInt52, false, true),
    info(8, 8, MemorySize::UInt64, false, true),
    info(8, 8, MemorySize::Int64, true, true),
    info(4, 4, MemorySize::Float32, true, true),
    info(8, 8, MemorySize::Float64, true, true),
    info(4, 2, MemorySize::Int16, true, true),
    info(4, 2, MemorySize::Int16, true, true),
    info(4, 2, MemorySize::Int16, true, true),
    info(8, 4, MemorySize::UInt32, false, true),
    info(8, 4, MemorySize::UInt32, false, true),
    info(8, 4, MemorySize::UInt32, false, true),
    info(8, 4, MemorySize::Int32, true, true),
    info(8, 4, MemorySize::Int32, true, true),
    info(8, 4, MemorySize::Int32, true, true),
    info(4, 2, MemorySize::BFloat16, true, true),
    info(4, 2, MemorySize::BFloat16, true, true),
    info(4, 2, MemorySize::BFloat16, true, true),
];

impl MemorySize {
    fn info(&self) -> &'static Info {
        &INFO[*self as usize]
    }

    /// Returns the number of bytes accessed, zero if the size is unknown or
    /// depends on the processor state (XSAVE area).
    ///
    /// For broadcast sizes this is the size of the single element read.
    pub fn size(&self) -> usize {
        self.info().size as usize
    }

    /// Returns the size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.info().element_size as usize
    }

    /// Returns the element type, `self` for non-packed sizes.
    pub fn element_type(&self) -> MemorySize {
        self.info().element_type
    }

    pub fn is_signed(&self) -> bool {
        self.info().signed
    }

    pub fn is_broadcast(&self) -> bool {
        self.info().broadcast
    }

    pub fn is_packed(&self) -> bool {
        self.info().element_size < self.info().size
    }

    /// Returns the number of elements, one for non-packed sizes.
    pub fn element_count(&self) -> usize {
        match self.info().element_size {
            0 => 1,
            n => self.info().size as usize / n as usize,
        }
    }
}

impl Default for MemorySize {
    fn default() -> Self {
        Self::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(MemorySize::Unknown.size(), 0);
        assert_eq!(MemorySize::UInt32.size(), 4);
        assert_eq!(MemorySize::Float80.size(), 10);
        assert_eq!(MemorySize::SegPtr32.size(), 6);
        assert_eq!(MemorySize::Packed512_Float32.size(), 64);
        assert_eq!(MemorySize::Packed512_Float32.element_count(), 16);
        assert_eq!(MemorySize::Packed512_Float32.element_type(), MemorySize::Float32);
        assert!(!MemorySize::Packed512_Float32.is_broadcast());
        assert!(MemorySize::Packed128_Int16.is_packed());
        assert!(MemorySize::Packed128_Int16.is_signed());
    }

    #[test]
    fn broadcast() {
        let size = MemorySize::Broadcast512_Float64;
        assert!(size.is_broadcast());
        assert_eq!(size.size(), 8);
        assert_eq!(size.element_type(), MemorySize::Float64);
        assert!(!MemorySize::UInt64.is_broadcast());
    }

    #[test]
    fn table_order() {
        for (i, size) in MemorySize::ALL.iter().enumerate() {
            assert_eq!(size.index(), i);
        }
        assert_eq!(INFO.len(), MemorySize::COUNT);
    }
}
