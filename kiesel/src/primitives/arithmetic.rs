//! Arithmetic primitives. The machine-integer, large-integer and float
//! index ranges all land on the same tower functions, which promote and
//! shrink as needed.

use std::cmp::Ordering;

use crate::interpreter::{Machine, Unwind};
use crate::numeric;
use crate::primitives::{fail, first_arg, PrimitiveDesc, PrimitiveSet};
use crate::value::Object;

pub fn set() -> PrimitiveSet {
    let mut indexed = Vec::new();
    for base in [1u16, 21] {
        indexed.extend([
            (base, PrimitiveDesc::new("number_add", 1, add)),
            (base + 1, PrimitiveDesc::new("number_subtract", 1, subtract)),
            (base + 2, PrimitiveDesc::new("number_less", 1, less)),
            (base + 3, PrimitiveDesc::new("number_greater", 1, greater)),
            (
                base + 4,
                PrimitiveDesc::new("number_less_or_equal", 1, less_or_equal),
            ),
            (
                base + 5,
                PrimitiveDesc::new(
                    "number_greater_or_equal",
                    1,
                    greater_or_equal,
                ),
            ),
            (base + 6, PrimitiveDesc::new("number_equal", 1, equal)),
            (base + 7, PrimitiveDesc::new("number_not_equal", 1, not_equal)),
            (base + 8, PrimitiveDesc::new("number_multiply", 1, multiply)),
            (base + 9, PrimitiveDesc::new("number_divide", 1, divide)),
            (base + 10, PrimitiveDesc::new("number_modulo", 1, modulo)),
            (
                base + 11,
                PrimitiveDesc::new("number_floor_divide", 1, floor_divide),
            ),
            (base + 12, PrimitiveDesc::new("number_quotient", 1, quotient)),
            (base + 13, PrimitiveDesc::new("number_bit_and", 1, bit_and)),
            (base + 14, PrimitiveDesc::new("number_bit_or", 1, bit_or)),
            (base + 15, PrimitiveDesc::new("number_bit_xor", 1, bit_xor)),
            (base + 16, PrimitiveDesc::new("number_bit_shift", 1, bit_shift)),
        ]);
    }
    indexed.push((40, PrimitiveDesc::new("number_as_float", 0, as_float)));
    indexed.extend([
        (41, PrimitiveDesc::new("number_add", 1, add)),
        (42, PrimitiveDesc::new("number_subtract", 1, subtract)),
        (43, PrimitiveDesc::new("number_less", 1, less)),
        (44, PrimitiveDesc::new("number_greater", 1, greater)),
        (45, PrimitiveDesc::new("number_less_or_equal", 1, less_or_equal)),
        (
            46,
            PrimitiveDesc::new("number_greater_or_equal", 1, greater_or_equal),
        ),
        (47, PrimitiveDesc::new("number_equal", 1, equal)),
        (48, PrimitiveDesc::new("number_not_equal", 1, not_equal)),
        (49, PrimitiveDesc::new("number_multiply", 1, multiply)),
        (50, PrimitiveDesc::new("number_divide", 1, divide)),
        (51, PrimitiveDesc::new("number_truncated", 0, truncated)),
    ]);
    PrimitiveSet {
        name: "arithmetic",
        indexed,
        named: Vec::new(),
        ranged: None,
    }
}

pub fn add(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::add(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn subtract(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::subtract(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn multiply(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::multiply(&receiver, first_arg(args)?).ok_or_else(fail)
}

/// `/` answers only when the division is exact, so the fallback code can
/// build a fraction for the rest.
pub fn divide(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::divide_exact(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn modulo(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::floor_modulo(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn floor_divide(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::floor_divide(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn quotient(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::quotient(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn bit_and(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::bit_and(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn bit_or(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::bit_or(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn bit_xor(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::bit_xor(&receiver, first_arg(args)?).ok_or_else(fail)
}

pub fn bit_shift(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::bit_shift(&receiver, first_arg(args)?).ok_or_else(fail)
}

fn compared(
    receiver: &Object,
    args: &[Object],
    accept: impl Fn(Ordering) -> bool,
) -> Result<Object, Unwind> {
    let ordering =
        numeric::compare(receiver, first_arg(args)?).ok_or_else(fail)?;
    Ok(Object::boolean(accept(ordering)))
}

pub fn less(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    compared(&receiver, args, Ordering::is_lt)
}

pub fn greater(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    compared(&receiver, args, Ordering::is_gt)
}

pub fn less_or_equal(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    compared(&receiver, args, Ordering::is_le)
}

pub fn greater_or_equal(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    compared(&receiver, args, Ordering::is_ge)
}

pub fn equal(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::equals(&receiver, first_arg(args)?)
        .map(Object::boolean)
        .ok_or_else(fail)
}

pub fn not_equal(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    numeric::equals(&receiver, first_arg(args)?)
        .map(|same| Object::boolean(!same))
        .ok_or_else(fail)
}

pub fn as_float(
    _machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    numeric::as_float(&receiver).ok_or_else(fail)
}

pub fn truncated(
    _machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    numeric::truncated(&receiver).ok_or_else(fail)
}
