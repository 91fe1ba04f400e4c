use fastnum::{
    UD128, bint,
    decimal::{Context, RoundingMode},
};

/// Fixed-point to decimal converter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Converter {
    decimals: i32,
}

impl Converter {
    pub fn new(decimals: u8) -> Self {
        Self {
            decimals: decimals as i32,
        }
    }

    pub fn decimals(&self) -> u8 {
        self.decimals as u8
    }

    /// Converts native fixed-point integer to decimal.
    pub fn from_native(&self, value: u128) -> UD128 {
        native(value, -self.decimals)
    }

    /// Applies the fixed-point precision to an already computed decimal,
    /// e.g. to a ratio of two native quantities.
    pub fn scale(&self, value: UD128) -> UD128 {
        value * native(1, -self.decimals)
    }
}

/// Exact ratio of two native integers, `None` if the denominator is zero.
pub fn ratio(numerator: u128, denominator: u128) -> Option<UD128> {
    if denominator == 0 {
        return None;
    }
    Some(native(numerator, 0) / native(denominator, 0))
}

fn native(value: u128, exp: i32) -> UD128 {
    let unscaled = bint::UInt::<2>::from_le_slice(&value.to_le_bytes())
        .expect("Converter: u128 -> UInt::<2>");
    UD128::from_parts(
        unscaled,
        exp,
        Context::default().with_rounding_mode(RoundingMode::Floor),
    )
}

/// Serde adapter representing decimals as strings.
pub mod decimal_str {
    use fastnum::decimal::{Context, UnsignedDecimal};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        value: &UnsignedDecimal<N>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<UnsignedDecimal<N>, D::Error> {
        let s = String::deserialize(deserializer)?;
        UnsignedDecimal::<N>::from_str(&s, Context::default()).map_err(serde::de::Error::custom)
    }
}
