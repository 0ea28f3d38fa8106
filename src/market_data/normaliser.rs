// Convert wire decimal strings into integer ticks and back for display.
// One fixed scale per symbol: price = ticks / scale.

use crate::engine::types::PriceTicks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickScale {
    scale: i64,  // e.g. 100 => cents
    places: u32, // decimal places implied by scale
}

impl TickScale {
    /// `scale` must be a power of ten; anything else is rounded down to one (min 1).
    pub fn new(scale: i64) -> Self {
        let places = scale.max(1).ilog10();
        Self { scale: 10i64.pow(places), places }
    }

    pub fn scale(&self) -> i64 {
        self.scale
    }

    /// Parse a decimal string. Extra fraction digits are truncated.
    /// Returns `None` for malformed input or values outside the tick range.
    pub fn to_ticks(&self, s: &str) -> Option<PriceTicks> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let integer: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
        let places = self.places as usize;
        let frac: i64 = if places == 0 {
            0
        } else {
            let kept = &frac_part[..frac_part.len().min(places)];
            format!("{kept:0<places$}").parse().ok()?
        };

        let ticks = integer.checked_mul(self.scale)?.checked_add(frac)?;
        PriceTicks::try_from(if negative { -ticks } else { ticks }).ok()
    }

    pub fn to_price(&self, ticks: PriceTicks) -> f64 {
        ticks as f64 / self.scale as f64
    }

    /// Fixed-point rendering with exactly the scale's decimal places.
    pub fn format(&self, ticks: PriceTicks) -> String {
        format!("{:.*}", self.places as usize, self.to_price(ticks))
    }
}

impl Default for TickScale {
    fn default() -> Self {
        Self::new(100)
    }
}
