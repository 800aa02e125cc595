//! Arithmetic over the numeric tower: machine integers promote to big
//! integers on overflow, anything mixed with a float becomes a float, and
//! big results that fit shrink back to machine integers.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::value::Object;

/// Widest shift a bitShift: will perform before failing, in bits.
const SHIFT_LIMIT: i64 = 65_536;

enum Num {
    Small(i64),
    Large(Rc<BigInt>),
    Float(f64),
}

fn classify(object: &Object) -> Option<Num> {
    match object {
        Object::SmallInt(v) => Some(Num::Small(*v)),
        Object::LargeInt(v) => Some(Num::Large(Rc::clone(v))),
        Object::Float(v) => Some(Num::Float(*v)),
        _ => None,
    }
}

fn to_big(num: &Num) -> Option<BigInt> {
    match num {
        Num::Small(v) => Some(BigInt::from(*v)),
        Num::Large(v) => Some((**v).clone()),
        Num::Float(_) => None,
    }
}

fn to_f64(num: &Num) -> Option<f64> {
    match num {
        Num::Small(v) => Some(*v as f64),
        Num::Large(v) => v.to_f64(),
        Num::Float(v) => Some(*v),
    }
}

/// Big integer result, shrunk back to a machine integer when it fits.
pub fn from_big(value: BigInt) -> Object {
    match value.to_i64() {
        Some(small) => Object::SmallInt(small),
        None => Object::LargeInt(Rc::new(value)),
    }
}

pub fn is_number(object: &Object) -> bool {
    classify(object).is_some()
}

fn binary_int_op(
    a: &Num,
    b: &Num,
    small: impl Fn(i64, i64) -> Option<i64>,
    big: impl Fn(&BigInt, &BigInt) -> BigInt,
) -> Option<Object> {
    if let (Num::Small(x), Num::Small(y)) = (a, b) {
        if let Some(result) = small(*x, *y) {
            return Some(Object::SmallInt(result));
        }
    }
    let x = to_big(a)?;
    let y = to_big(b)?;
    Some(from_big(big(&x, &y)))
}

fn has_float(a: &Num, b: &Num) -> bool {
    matches!(a, Num::Float(_)) || matches!(b, Num::Float(_))
}

pub fn add(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        return Some(Object::Float(to_f64(&a)? + to_f64(&b)?));
    }
    binary_int_op(&a, &b, i64::checked_add, |x, y| x + y)
}

pub fn subtract(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        return Some(Object::Float(to_f64(&a)? - to_f64(&b)?));
    }
    binary_int_op(&a, &b, i64::checked_sub, |x, y| x - y)
}

pub fn multiply(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        return Some(Object::Float(to_f64(&a)? * to_f64(&b)?));
    }
    binary_int_op(&a, &b, i64::checked_mul, |x, y| x * y)
}

/// `/` divides exactly or not at all: a zero divisor or a nonzero
/// remainder fails so the image can fall back to fractions.
pub fn divide_exact(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        let divisor = to_f64(&b)?;
        if divisor == 0.0 {
            return None;
        }
        return Some(Object::Float(to_f64(&a)? / divisor));
    }
    let x = to_big(&a)?;
    let y = to_big(&b)?;
    if y.is_zero() || !(&x % &y).is_zero() {
        return None;
    }
    Some(from_big(x / y))
}

fn floor_div_small(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod_small(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

fn floor_div_big(a: &BigInt, b: &BigInt) -> BigInt {
    let q = a / b;
    let r = a - &q * b;
    if !r.is_zero() && (r.is_negative() != b.is_negative()) {
        q - 1
    } else {
        q
    }
}

fn floor_mod_big(a: &BigInt, b: &BigInt) -> BigInt {
    let r = a % b;
    if !r.is_zero() && (r.is_negative() != b.is_negative()) {
        r + b
    } else {
        r
    }
}

/// `//` rounds toward negative infinity.
pub fn floor_divide(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) || is_zero(&b) {
        return None;
    }
    binary_int_op(&a, &b, floor_div_small, floor_div_big)
}

/// `\\` takes the sign of the divisor.
pub fn floor_modulo(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) || is_zero(&b) {
        return None;
    }
    binary_int_op(&a, &b, floor_mod_small, floor_mod_big)
}

/// `quo:` truncates toward zero.
pub fn quotient(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) || is_zero(&b) {
        return None;
    }
    binary_int_op(&a, &b, i64::checked_div, |x, y| x / y)
}

fn is_zero(num: &Num) -> bool {
    match num {
        Num::Small(v) => *v == 0,
        Num::Large(v) => v.is_zero(),
        Num::Float(v) => *v == 0.0,
    }
}

pub fn bit_and(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        return None;
    }
    binary_int_op(&a, &b, |x, y| Some(x & y), |x, y| x & y)
}

pub fn bit_or(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        return None;
    }
    binary_int_op(&a, &b, |x, y| Some(x | y), |x, y| x | y)
}

pub fn bit_xor(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        return None;
    }
    binary_int_op(&a, &b, |x, y| Some(x ^ y), |x, y| x ^ y)
}

/// Positive shift is left, negative is an arithmetic right shift.
pub fn bit_shift(a: &Object, b: &Object) -> Option<Object> {
    let (a, b) = (classify(a)?, classify(b)?);
    let Num::Small(amount) = b else { return None };
    if amount.abs() > SHIFT_LIMIT {
        return None;
    }
    let value = to_big(&a)?;
    let shifted = if amount >= 0 {
        value << amount as usize
    } else {
        value >> (-amount) as usize
    };
    Some(from_big(shifted))
}

pub fn compare(a: &Object, b: &Object) -> Option<Ordering> {
    let (a, b) = (classify(a)?, classify(b)?);
    if has_float(&a, &b) {
        return to_f64(&a)?.partial_cmp(&to_f64(&b)?);
    }
    if let (Num::Small(x), Num::Small(y)) = (&a, &b) {
        return Some(x.cmp(y));
    }
    Some(to_big(&a)?.cmp(&to_big(&b)?))
}

/// Numeric equality across representations, so `2 = 2.0`.
pub fn equals(a: &Object, b: &Object) -> Option<bool> {
    if !is_number(a) || !is_number(b) {
        return None;
    }
    Some(compare(a, b) == Some(Ordering::Equal))
}

pub fn as_float(a: &Object) -> Option<Object> {
    let num = classify(a)?;
    Some(Object::Float(to_f64(&num)?))
}

/// Float truncated toward zero into an integer.
pub fn truncated(a: &Object) -> Option<Object> {
    match classify(a)? {
        Num::Small(v) => Some(Object::SmallInt(v)),
        Num::Large(v) => Some(from_big((*v).clone())),
        Num::Float(v) => {
            if !v.is_finite() {
                return None;
            }
            Some(from_big(BigInt::from_f64(v.trunc())?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(v: i64) -> Object {
        Object::SmallInt(v)
    }

    fn large(v: i128) -> Object {
        Object::LargeInt(Rc::new(BigInt::from(v)))
    }

    #[test]
    fn overflow_promotes_to_large() {
        let result = add(&small(i64::MAX), &small(1)).unwrap();
        assert!(matches!(result, Object::LargeInt(_)));
        let result = multiply(&small(i64::MAX), &small(2)).unwrap();
        assert!(matches!(result, Object::LargeInt(_)));
    }

    #[test]
    fn large_results_shrink_back_when_they_fit() {
        let big = add(&small(i64::MAX), &small(1)).unwrap();
        let back = subtract(&big, &small(1)).unwrap();
        assert!(matches!(back, Object::SmallInt(v) if v == i64::MAX));
    }

    #[test]
    fn float_is_contagious() {
        assert!(matches!(
            add(&small(1), &Object::Float(0.5)),
            Some(Object::Float(v)) if v == 1.5
        ));
        assert!(matches!(
            multiply(&large(1 << 70), &Object::Float(0.0)),
            Some(Object::Float(v)) if v == 0.0
        ));
    }

    #[test]
    fn exact_division_fails_unless_exact() {
        assert!(matches!(
            divide_exact(&small(8), &small(2)),
            Some(Object::SmallInt(4))
        ));
        assert_eq!(divide_exact(&small(7), &small(2)), None);
        assert_eq!(divide_exact(&small(7), &small(0)), None);
        assert!(matches!(
            divide_exact(&Object::Float(7.0), &small(2)),
            Some(Object::Float(v)) if v == 3.5
        ));
    }

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert!(matches!(
            floor_divide(&small(-7), &small(2)),
            Some(Object::SmallInt(-4))
        ));
        assert!(matches!(
            floor_divide(&small(7), &small(2)),
            Some(Object::SmallInt(3))
        ));
        assert!(matches!(
            floor_divide(&small(7), &small(-2)),
            Some(Object::SmallInt(-4))
        ));
        assert_eq!(floor_divide(&small(7), &small(0)), None);
    }

    #[test]
    fn floor_modulo_takes_the_divisor_sign() {
        assert!(matches!(
            floor_modulo(&small(-7), &small(2)),
            Some(Object::SmallInt(1))
        ));
        assert!(matches!(
            floor_modulo(&small(7), &small(-2)),
            Some(Object::SmallInt(-1))
        ));
        assert!(matches!(
            floor_modulo(&small(7), &small(2)),
            Some(Object::SmallInt(1))
        ));
        assert!(matches!(
            floor_modulo(&large(-7), &large(2)),
            Some(Object::SmallInt(1))
        ));
    }

    #[test]
    fn quotient_truncates_toward_zero() {
        assert!(matches!(
            quotient(&small(-7), &small(2)),
            Some(Object::SmallInt(-3))
        ));
        assert!(matches!(
            quotient(&small(7), &small(-2)),
            Some(Object::SmallInt(-3))
        ));
    }

    #[test]
    fn division_overflow_promotes_instead_of_failing() {
        // i64::MIN / -1 does not fit a machine integer.
        let result = quotient(&small(i64::MIN), &small(-1)).unwrap();
        assert!(matches!(result, Object::LargeInt(_)));
        let result = floor_divide(&small(i64::MIN), &small(-1)).unwrap();
        assert!(matches!(result, Object::LargeInt(_)));
    }

    #[test]
    fn shifts_move_both_directions() {
        assert!(matches!(
            bit_shift(&small(1), &small(4)),
            Some(Object::SmallInt(16))
        ));
        assert!(matches!(
            bit_shift(&small(-16), &small(-2)),
            Some(Object::SmallInt(-4))
        ));
        assert!(matches!(
            bit_shift(&small(1), &small(100)),
            Some(Object::LargeInt(_))
        ));
        assert_eq!(bit_shift(&small(1), &small(SHIFT_LIMIT + 1)), None);
        assert_eq!(bit_shift(&small(1), &Object::Float(1.0)), None);
    }

    #[test]
    fn comparisons_promote() {
        assert_eq!(
            compare(&small(2), &Object::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(compare(&large(1 << 70), &small(5)), Some(Ordering::Greater));
        assert_eq!(compare(&small(1), &Object::Float(f64::NAN)), None);
        assert_eq!(equals(&small(2), &Object::Float(2.0)), Some(true));
        assert_eq!(equals(&small(2), &Object::Nil), None);
    }

    #[test]
    fn truncation_and_widening() {
        assert!(matches!(
            as_float(&small(2)),
            Some(Object::Float(v)) if v == 2.0
        ));
        assert!(matches!(
            truncated(&Object::Float(-2.7)),
            Some(Object::SmallInt(-2))
        ));
        assert_eq!(truncated(&Object::Float(f64::INFINITY)), None);
    }
}
