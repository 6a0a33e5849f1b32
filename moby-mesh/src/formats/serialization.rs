//! Binary serialization trait for fixed-size records.
//!
//! Every fixed-size on-disk record implements `BinarySerializable` so the
//! submesh table and vertex table code can read and write them through one
//! interface. Each type also keeps its own `to_bytes()` returning a
//! fixed-size array.

/// Trait for fixed-size binary records.
///
/// The trait returns `Vec<u8>` because associated const generics in return
/// types (`[u8; Self::SIZE]`) are not yet stable in Rust. Use the
/// type-specific `to_bytes()` methods where a fixed-size array is handier.
pub trait BinarySerializable: Sized {
    /// Size of the serialized record in bytes.
    const SIZE: usize;

    fn serialize(&self) -> Vec<u8>;

    /// Returns `None` if the byte slice is too short.
    fn deserialize(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_binary_serializable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BinarySerializable for $ty {
                const SIZE: usize = <$ty>::SIZE;

                fn serialize(&self) -> Vec<u8> {
                    self.to_bytes().to_vec()
                }

                fn deserialize(bytes: &[u8]) -> Option<Self> {
                    Self::from_bytes(bytes)
                }
            }
        )*
    };
}

impl_binary_serializable!(
    super::SubmeshEntry,
    super::GifUsageEntry,
    super::IndexHeader,
    super::VertexTableHeader,
    super::MetalVertexTableHeader,
    super::MetalVertex,
);

/// Read `count` consecutive records starting at `offset`
pub fn read_records<T: BinarySerializable>(
    bytes: &[u8],
    offset: usize,
    count: usize,
) -> Option<Vec<T>> {
    let end = count.checked_mul(T::SIZE)?.checked_add(offset)?;
    let src = bytes.get(offset..end)?;
    src.chunks_exact(T::SIZE).map(T::deserialize).collect()
}
