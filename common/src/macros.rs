/// Round a `Decimal` to `decimals` places, half away from zero.
#[macro_export]
macro_rules! quantize {
  ($num:expr, $decimals:expr) => {{
    $num.round_dp_with_strategy(
      $decimals,
      rust_decimal::RoundingStrategy::MidpointAwayFromZero,
    )
  }};
}

#[cfg(test)]
mod tests {
  use rust_decimal_macros::dec;

  #[test]
  fn midpoints_round_away_from_zero() {
    assert_eq!(crate::quantize!(dec!(1.005), 2), dec!(1.01));
    assert_eq!(crate::quantize!(dec!(-1.005), 2), dec!(-1.01));
    assert_eq!(crate::quantize!(dec!(1.004), 2), dec!(1.00));
  }
}

