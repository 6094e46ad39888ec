use crate::domain::errors::ValidationError;

/// Non-negative, finite quote price.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Price(f64);

impl Price {
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        if value < 0.0 {
            return Err(ValidationError::InvalidPrice(format!(
                "price must be non-negative, got {}",
                value
            )));
        }
        Ok(Price(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Relative change from `self` to `other`, as a fraction. Zero when `self` is zero.
    pub fn change_to(&self, other: Price) -> f64 {
        if self.0 == 0.0 {
            0.0
        } else {
            (other.0 - self.0) / self.0
        }
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_new_valid() {
        let price = Price::new(100.0).unwrap();
        assert_eq!(price.value(), 100.0);
    }

    #[test]
    fn test_price_new_negative() {
        assert!(matches!(
            Price::new(-10.0),
            Err(ValidationError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_price_rejects_nan_and_infinity() {
        assert!(matches!(Price::new(f64::NAN), Err(ValidationError::MustBeFinite)));
        assert!(matches!(
            Price::new(f64::INFINITY),
            Err(ValidationError::MustBeFinite)
        ));
    }

    #[test]
    fn test_price_change_to() {
        let from = Price::new(100.0).unwrap();
        let to = Price::new(110.0).unwrap();
        assert!((from.change_to(to) - 0.10).abs() < 1e-12);
        assert_eq!(Price::new(0.0).unwrap().change_to(to), 0.0);
    }
}
