use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SeedQuantityUnits
// ---------------------------------------------------------------------------

/// Units a seed quantity can be expressed in: a discrete seed count, or one
/// of the supported weight units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedQuantityUnits {
    Seeds,
    Milligrams,
    Grams,
    Kilograms,
    Ounces,
    Pounds,
}

impl SeedQuantityUnits {
    pub fn is_weight(&self) -> bool {
        !matches!(self, SeedQuantityUnits::Seeds)
    }

    /// Fixed multiplier from this unit to grams. `None` for seed counts.
    ///
    /// 1 oz = 28.3495 g and 1 lb = 453.592 g; derived gram values are
    /// rounded to 9 decimal places and are display/estimate-only — stored
    /// quantities are never converted in place.
    pub fn grams_multiplier(&self) -> Option<Decimal> {
        match self {
            SeedQuantityUnits::Seeds => None,
            SeedQuantityUnits::Milligrams => Some(Decimal::new(1, 3)),
            SeedQuantityUnits::Grams => Some(Decimal::ONE),
            SeedQuantityUnits::Kilograms => Some(Decimal::new(1000, 0)),
            SeedQuantityUnits::Ounces => Some(Decimal::new(283_495, 4)),
            SeedQuantityUnits::Pounds => Some(Decimal::new(453_592, 3)),
        }
    }

    /// Display name, e.g. "seed"/"seeds", used in history descriptions.
    pub fn display_name(&self, plural: bool) -> &'static str {
        match (self, plural) {
            (SeedQuantityUnits::Seeds, false) => "seed",
            (SeedQuantityUnits::Seeds, true) => "seeds",
            (SeedQuantityUnits::Milligrams, false) => "milligram",
            (SeedQuantityUnits::Milligrams, true) => "milligrams",
            (SeedQuantityUnits::Grams, false) => "gram",
            (SeedQuantityUnits::Grams, true) => "grams",
            (SeedQuantityUnits::Kilograms, false) => "kilogram",
            (SeedQuantityUnits::Kilograms, true) => "kilograms",
            (SeedQuantityUnits::Ounces, false) => "ounce",
            (SeedQuantityUnits::Ounces, true) => "ounces",
            (SeedQuantityUnits::Pounds, false) => "pound",
            (SeedQuantityUnits::Pounds, true) => "pounds",
        }
    }
}

// ---------------------------------------------------------------------------
// SeedQuantity
// ---------------------------------------------------------------------------

/// An immutable (amount, units) pair. All quantity arithmetic is exact
/// decimal; cross-unit comparisons go through [`ConversionRatio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedQuantity {
    pub quantity: Decimal,
    pub units: SeedQuantityUnits,
}

impl SeedQuantity {
    pub fn new(quantity: Decimal, units: SeedQuantityUnits) -> Self {
        Self { quantity, units }
    }

    /// A count of discrete seeds.
    pub fn seeds(count: i64) -> Self {
        Self::new(Decimal::from(count), SeedQuantityUnits::Seeds)
    }

    /// A weight in grams.
    pub fn grams_of(amount: i64) -> Self {
        Self::new(Decimal::from(amount), SeedQuantityUnits::Grams)
    }

    /// Derived weight in grams. `None` for seed counts.
    pub fn grams(&self) -> Option<Decimal> {
        self.units
            .grams_multiplier()
            .map(|m| (self.quantity * m).round_dp(9))
    }

    pub fn is_zero(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.quantity.is_sign_negative() && !self.quantity.is_zero()
    }

    /// Add a same-unit quantity. `None` on unit mismatch.
    pub fn checked_add(&self, other: &SeedQuantity) -> Option<SeedQuantity> {
        if self.units != other.units {
            return None;
        }
        Some(Self::new(self.quantity + other.quantity, self.units))
    }

    /// Subtract a same-unit quantity. `None` on unit mismatch or if the
    /// result would be negative — never clamps; callers surface a
    /// validation error instead.
    pub fn checked_sub(&self, other: &SeedQuantity) -> Option<SeedQuantity> {
        if self.units != other.units {
            return None;
        }
        let result = self.quantity - other.quantity;
        if result.is_sign_negative() && !result.is_zero() {
            return None;
        }
        Some(Self::new(result, self.units))
    }

    /// Convert between weight units (or seeds to seeds). Conversion between
    /// the count and weight families needs a [`ConversionRatio`] and returns
    /// `None` here.
    pub fn to_units(&self, units: SeedQuantityUnits) -> Option<SeedQuantity> {
        if self.units == units {
            return Some(*self);
        }
        let grams = self.grams()?;
        let divisor = units.grams_multiplier()?;
        Some(Self::new((grams / divisor).round_dp(9), units))
    }
}

// ---------------------------------------------------------------------------
// ConversionRatio
// ---------------------------------------------------------------------------

/// Seed-count-per-weight ratio built from an accession's subset count and
/// subset weight. The only source of truth for estimated cross-family
/// quantities: when either subset value is missing, every conversion is
/// "unknown" (`None`) — distinct from zero, and never an error by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionRatio {
    subset_count: Decimal,
    subset_weight_grams: Decimal,
}

impl ConversionRatio {
    pub fn from_subset(
        subset_count: Option<u32>,
        subset_weight: Option<&SeedQuantity>,
    ) -> Option<Self> {
        let count = subset_count?;
        let grams = subset_weight?.grams()?;
        if count == 0 || grams <= Decimal::ZERO {
            return None;
        }
        Some(Self {
            subset_count: Decimal::from(count),
            subset_weight_grams: grams,
        })
    }

    /// Estimated seed count of a quantity. Counts pass through; weights are
    /// scaled by the ratio and truncated to a whole number of seeds.
    pub fn seed_count_of(&self, quantity: &SeedQuantity) -> Option<Decimal> {
        if quantity.units == SeedQuantityUnits::Seeds {
            return Some(quantity.quantity);
        }
        let grams = quantity.grams()?;
        Some((grams * self.subset_count / self.subset_weight_grams).trunc())
    }

    /// Estimated weight of a quantity in the requested weight units.
    pub fn weight_of(
        &self,
        quantity: &SeedQuantity,
        units: SeedQuantityUnits,
    ) -> Option<SeedQuantity> {
        let divisor = units.grams_multiplier()?;
        if quantity.units.is_weight() {
            return quantity.to_units(units);
        }
        let grams = quantity.quantity * self.subset_weight_grams / self.subset_count;
        Some(SeedQuantity::new((grams / divisor).round_dp(9), units))
    }

    /// Convert a quantity to the given units, crossing the count/weight
    /// boundary through the ratio.
    pub fn convert(
        &self,
        quantity: &SeedQuantity,
        units: SeedQuantityUnits,
    ) -> Option<SeedQuantity> {
        if units == SeedQuantityUnits::Seeds {
            self.seed_count_of(quantity)
                .map(|count| SeedQuantity::new(count, SeedQuantityUnits::Seeds))
        } else {
            self.weight_of(quantity, units)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grams_derivation() {
        assert_eq!(SeedQuantity::seeds(10).grams(), None);
        assert_eq!(
            SeedQuantity::grams_of(10).grams(),
            Some(Decimal::from(10))
        );
        assert_eq!(
            SeedQuantity::new(Decimal::from(2), SeedQuantityUnits::Kilograms).grams(),
            Some(Decimal::from(2000))
        );
        assert_eq!(
            SeedQuantity::new(Decimal::from(1), SeedQuantityUnits::Ounces).grams(),
            Some(Decimal::new(283_495, 4))
        );
        assert_eq!(
            SeedQuantity::new(Decimal::from(3), SeedQuantityUnits::Milligrams).grams(),
            Some(Decimal::new(3, 3))
        );
    }

    #[test]
    fn checked_sub_refuses_negative_results() {
        let ten = SeedQuantity::seeds(10);
        let three = SeedQuantity::seeds(3);
        assert_eq!(ten.checked_sub(&three), Some(SeedQuantity::seeds(7)));
        assert_eq!(three.checked_sub(&ten), None);
        assert_eq!(ten.checked_sub(&ten), Some(SeedQuantity::seeds(0)));
    }

    #[test]
    fn checked_arithmetic_requires_matching_units() {
        let seeds = SeedQuantity::seeds(10);
        let grams = SeedQuantity::grams_of(10);
        assert_eq!(seeds.checked_add(&grams), None);
        assert_eq!(seeds.checked_sub(&grams), None);
    }

    #[test]
    fn weight_to_weight_conversion() {
        let kg = SeedQuantity::new(Decimal::new(15, 1), SeedQuantityUnits::Kilograms);
        let grams = kg.to_units(SeedQuantityUnits::Grams).unwrap();
        assert_eq!(grams.quantity, Decimal::from(1500));

        // Crossing the family boundary needs a ratio.
        assert_eq!(kg.to_units(SeedQuantityUnits::Seeds), None);
        assert_eq!(SeedQuantity::seeds(5).to_units(SeedQuantityUnits::Grams), None);
    }

    #[test]
    fn ratio_requires_both_subset_values() {
        let weight = SeedQuantity::grams_of(1);
        assert!(ConversionRatio::from_subset(Some(10), Some(&weight)).is_some());
        assert!(ConversionRatio::from_subset(None, Some(&weight)).is_none());
        assert!(ConversionRatio::from_subset(Some(10), None).is_none());
        assert!(ConversionRatio::from_subset(Some(0), Some(&weight)).is_none());
    }

    #[test]
    fn ratio_estimates_seed_count_from_weight() {
        // 10 seeds per gram; 100 grams -> 1000 seeds.
        let ratio =
            ConversionRatio::from_subset(Some(10), Some(&SeedQuantity::grams_of(1))).unwrap();
        let count = ratio.seed_count_of(&SeedQuantity::grams_of(100)).unwrap();
        assert_eq!(count, Decimal::from(1000));

        // Partial seeds truncate.
        let count = ratio
            .seed_count_of(&SeedQuantity::new(
                Decimal::new(25, 2),
                SeedQuantityUnits::Grams,
            ))
            .unwrap();
        assert_eq!(count, Decimal::from(2));
    }

    #[test]
    fn ratio_estimates_weight_from_seed_count() {
        let ratio =
            ConversionRatio::from_subset(Some(10), Some(&SeedQuantity::grams_of(1))).unwrap();
        let weight = ratio
            .weight_of(&SeedQuantity::seeds(250), SeedQuantityUnits::Grams)
            .unwrap();
        assert_eq!(weight.quantity, Decimal::from(25));
    }

    #[test]
    fn convert_targets_either_family() {
        let ratio =
            ConversionRatio::from_subset(Some(10), Some(&SeedQuantity::grams_of(1))).unwrap();
        let as_seeds = ratio
            .convert(&SeedQuantity::grams_of(10), SeedQuantityUnits::Seeds)
            .unwrap();
        assert_eq!(as_seeds, SeedQuantity::seeds(100));

        let as_kg = ratio
            .convert(&SeedQuantity::seeds(10_000), SeedQuantityUnits::Kilograms)
            .unwrap();
        assert_eq!(as_kg.quantity, Decimal::ONE);
    }
}
