//! Object storage primitives: indexable access, instantiation, identity
//! and copying. Indexable reads and writes are 1-based and sit after the
//! named slots of pointer objects.

use crate::class::{self, InstanceFormat};
use crate::interpreter::{Machine, Unwind};
use crate::primitives::{
    expect_index, expect_small, fail, first_arg, PrimitiveDesc, PrimitiveSet,
};
use crate::value::{
    new_ref, BytesObject, Object, PointersObject, WordsObject,
};

pub fn set() -> PrimitiveSet {
    PrimitiveSet {
        name: "storage",
        indexed: vec![
            (60, PrimitiveDesc::new("object_at", 1, at)),
            (61, PrimitiveDesc::new("object_at_put", 2, at_put)),
            (62, PrimitiveDesc::new("object_size", 0, size)),
            (63, PrimitiveDesc::new("string_at", 1, string_at)),
            (64, PrimitiveDesc::new("string_at_put", 2, string_at_put)),
            (68, PrimitiveDesc::new("method_literal_at", 1, literal_at)),
            (70, PrimitiveDesc::new("class_new", 0, new)),
            (71, PrimitiveDesc::new("class_new_sized", 1, new_sized)),
            (73, PrimitiveDesc::new("object_inst_var_at", 1, inst_var_at)),
            (
                74,
                PrimitiveDesc::new(
                    "object_inst_var_at_put",
                    2,
                    inst_var_at_put,
                ),
            ),
            (75, PrimitiveDesc::new("object_identity_hash", 0, identity_hash)),
            (
                105,
                PrimitiveDesc::new("object_replace_from_to", 4, replace_from_to),
            ),
            (110, PrimitiveDesc::new("object_identical", 1, identical)),
            (111, PrimitiveDesc::new("object_class", 0, class_of)),
            (148, PrimitiveDesc::new("object_shallow_copy", 0, shallow_copy)),
            (170, PrimitiveDesc::new("character_value", 1, character_value)),
        ],
        named: Vec::new(),
        ranged: None,
    }
}

/// Named slot count of the receiver's class, which indexable access
/// skips over.
fn fixed_slots(object: &Object) -> usize {
    match object {
        Object::Pointers(pointers) => {
            class::instance_size(&pointers.borrow().class)
        }
        _ => 0,
    }
}

pub fn at(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let index = expect_index(first_arg(args)?)?;
    match &receiver {
        Object::Pointers(pointers) => {
            let offset = fixed_slots(&receiver) + index - 1;
            pointers.borrow().slots.get(offset).cloned().ok_or_else(fail)
        }
        Object::Bytes(bytes) => bytes
            .borrow()
            .bytes
            .get(index - 1)
            .map(|byte| Object::SmallInt(i64::from(*byte)))
            .ok_or_else(fail),
        Object::Words(words) => words
            .borrow()
            .words
            .get(index - 1)
            .map(|word| Object::SmallInt(i64::from(*word)))
            .ok_or_else(fail),
        _ => Err(fail()),
    }
}

pub fn at_put(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [index, value] = args else {
        return Err(fail());
    };
    let index = expect_index(index)?;
    match &receiver {
        Object::Pointers(pointers) => {
            let offset = fixed_slots(&receiver) + index - 1;
            let mut pointers = pointers.borrow_mut();
            let slot = pointers.slots.get_mut(offset).ok_or_else(fail)?;
            *slot = value.clone();
        }
        Object::Bytes(bytes) => {
            let byte =
                u8::try_from(expect_small(value)?).map_err(|_| fail())?;
            let mut bytes = bytes.borrow_mut();
            let slot = bytes.bytes.get_mut(index - 1).ok_or_else(fail)?;
            *slot = byte;
        }
        Object::Words(words) => {
            let word =
                u32::try_from(expect_small(value)?).map_err(|_| fail())?;
            let mut words = words.borrow_mut();
            let slot = words.words.get_mut(index - 1).ok_or_else(fail)?;
            *slot = word;
        }
        _ => return Err(fail()),
    }
    Ok(value.clone())
}

pub fn size(
    _machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    let size = match &receiver {
        Object::Pointers(pointers) => {
            let fixed = fixed_slots(&receiver);
            pointers.borrow().slots.len().saturating_sub(fixed)
        }
        Object::Bytes(bytes) => bytes.borrow().bytes.len(),
        Object::Words(words) => words.borrow().words.len(),
        _ => return Err(fail()),
    };
    Ok(Object::SmallInt(size as i64))
}

/// Byte access that answers characters instead of integers.
pub fn string_at(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let index = expect_index(first_arg(args)?)?;
    let Object::Bytes(bytes) = &receiver else {
        return Err(fail());
    };
    bytes
        .borrow()
        .bytes
        .get(index - 1)
        .map(|byte| Object::Char(char::from(*byte)))
        .ok_or_else(fail)
}

pub fn string_at_put(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [index, value] = args else {
        return Err(fail());
    };
    let index = expect_index(index)?;
    let Object::Bytes(bytes) = &receiver else {
        return Err(fail());
    };
    let Object::Char(character) = value else {
        return Err(fail());
    };
    let byte = u8::try_from(*character as u32).map_err(|_| fail())?;
    let mut bytes = bytes.borrow_mut();
    let slot = bytes.bytes.get_mut(index - 1).ok_or_else(fail)?;
    *slot = byte;
    Ok(value.clone())
}

pub fn literal_at(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let index = expect_index(first_arg(args)?)?;
    let Object::Method(method) = &receiver else {
        return Err(fail());
    };
    method.literal(index - 1).ok_or_else(fail)
}

pub fn new(
    _machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    let Object::Class(class) = &receiver else {
        return Err(fail());
    };
    let format = class.borrow().format;
    let fixed = class::instance_size(class);
    Ok(match format {
        InstanceFormat::Fixed | InstanceFormat::Variable => {
            Object::Pointers(new_ref(PointersObject {
                class: class.clone(),
                slots: vec![Object::Nil; fixed],
            }))
        }
        InstanceFormat::VariableBytes => Object::Bytes(new_ref(BytesObject {
            class: class.clone(),
            bytes: Vec::new(),
        })),
        InstanceFormat::VariableWords => Object::Words(new_ref(WordsObject {
            class: class.clone(),
            words: Vec::new(),
        })),
    })
}

pub fn new_sized(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let size = match first_arg(args)? {
        Object::SmallInt(v) if *v >= 0 => *v as usize,
        _ => return Err(fail()),
    };
    let Object::Class(class) = &receiver else {
        return Err(fail());
    };
    let format = class.borrow().format;
    let fixed = class::instance_size(class);
    Ok(match format {
        InstanceFormat::Fixed => return Err(fail()),
        InstanceFormat::Variable => Object::Pointers(new_ref(PointersObject {
            class: class.clone(),
            slots: vec![Object::Nil; fixed + size],
        })),
        InstanceFormat::VariableBytes => Object::Bytes(new_ref(BytesObject {
            class: class.clone(),
            bytes: vec![0; size],
        })),
        InstanceFormat::VariableWords => Object::Words(new_ref(WordsObject {
            class: class.clone(),
            words: vec![0; size],
        })),
    })
}

/// Absolute slot access, named part included.
pub fn inst_var_at(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let index = expect_index(first_arg(args)?)?;
    let Object::Pointers(pointers) = &receiver else {
        return Err(fail());
    };
    pointers.borrow().slots.get(index - 1).cloned().ok_or_else(fail)
}

pub fn inst_var_at_put(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [index, value] = args else {
        return Err(fail());
    };
    let index = expect_index(index)?;
    let Object::Pointers(pointers) = &receiver else {
        return Err(fail());
    };
    let mut pointers = pointers.borrow_mut();
    let slot = pointers.slots.get_mut(index - 1).ok_or_else(fail)?;
    *slot = value.clone();
    Ok(value.clone())
}

pub fn identity_hash(
    _machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    Ok(Object::SmallInt(
        (receiver.identity_hash() & 0x3FFF_FFFF) as i64,
    ))
}

/// Bulk copy of indexable elements between two objects of the same
/// storage kind. Source elements are snapshotted first so copying within
/// one object is safe.
pub fn replace_from_to(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [start, stop, replacement, replacement_start] = args else {
        return Err(fail());
    };
    let start = expect_index(start)?;
    let stop = expect_small(stop)?;
    if stop < 0 {
        return Err(fail());
    }
    let stop = stop as usize;
    if stop < start {
        return Ok(receiver);
    }
    let count = stop - start + 1;
    let replacement_start = expect_index(replacement_start)?;
    match (&receiver, replacement) {
        (Object::Pointers(target), Object::Pointers(source)) => {
            let target_offset = fixed_slots(&receiver) + start - 1;
            let source_offset =
                fixed_slots(replacement) + replacement_start - 1;
            let values: Vec<Object> = source
                .borrow()
                .slots
                .get(source_offset..source_offset + count)
                .ok_or_else(fail)?
                .to_vec();
            let mut target = target.borrow_mut();
            let slots = target
                .slots
                .get_mut(target_offset..target_offset + count)
                .ok_or_else(fail)?;
            slots.clone_from_slice(&values);
        }
        (Object::Bytes(target), Object::Bytes(source)) => {
            let values: Vec<u8> = source
                .borrow()
                .bytes
                .get(replacement_start - 1..replacement_start - 1 + count)
                .ok_or_else(fail)?
                .to_vec();
            let mut target = target.borrow_mut();
            let bytes = target
                .bytes
                .get_mut(start - 1..start - 1 + count)
                .ok_or_else(fail)?;
            bytes.copy_from_slice(&values);
        }
        (Object::Words(target), Object::Words(source)) => {
            let values: Vec<u32> = source
                .borrow()
                .words
                .get(replacement_start - 1..replacement_start - 1 + count)
                .ok_or_else(fail)?
                .to_vec();
            let mut target = target.borrow_mut();
            let words = target
                .words
                .get_mut(start - 1..start - 1 + count)
                .ok_or_else(fail)?;
            words.copy_from_slice(&values);
        }
        _ => return Err(fail()),
    }
    Ok(receiver)
}

pub fn identical(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    Ok(Object::boolean(receiver.identical(first_arg(args)?)))
}

pub fn class_of(
    machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    Ok(Object::Class(machine.image.class_of(&receiver)))
}

pub fn shallow_copy(
    _machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    Ok(match &receiver {
        Object::Pointers(pointers) => {
            let pointers = pointers.borrow();
            Object::Pointers(new_ref(PointersObject {
                class: pointers.class.clone(),
                slots: pointers.slots.clone(),
            }))
        }
        Object::Bytes(bytes) => {
            let bytes = bytes.borrow();
            Object::Bytes(new_ref(BytesObject {
                class: bytes.class.clone(),
                bytes: bytes.bytes.clone(),
            }))
        }
        Object::Words(words) => {
            let words = words.borrow();
            Object::Words(new_ref(WordsObject {
                class: words.class.clone(),
                words: words.words.clone(),
            }))
        }
        other => other.clone(),
    })
}

/// `Character value:` on the class side, `asCharacter` on an integer.
pub fn character_value(
    _machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let code = match args.first() {
        Some(value) => expect_small(value)?,
        None => expect_small(&receiver)?,
    };
    let code = u32::try_from(code).map_err(|_| fail())?;
    char::from_u32(code).map(Object::Char).ok_or_else(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    fn machine() -> Machine {
        Machine::new(Image::bootstrap())
    }

    #[test]
    fn indexable_access_skips_named_slots() {
        let mut m = machine();
        let class = class::new_class(
            "Sized",
            None,
            InstanceFormat::Variable,
            &["tag"],
        );
        let instance =
            new_sized(&mut m, Object::Class(class), &[Object::SmallInt(2)])
                .unwrap();
        at_put(
            &mut m,
            instance.clone(),
            &[Object::SmallInt(1), Object::SmallInt(42)],
        )
        .unwrap();
        let Object::Pointers(pointers) = &instance else {
            panic!("expected pointers");
        };
        assert!(matches!(
            pointers.borrow().slots[1],
            Object::SmallInt(42)
        ));
        assert!(matches!(
            at(&mut m, instance.clone(), &[Object::SmallInt(1)]),
            Ok(Object::SmallInt(42))
        ));
        assert!(matches!(
            size(&mut m, instance.clone(), &[]),
            Ok(Object::SmallInt(2))
        ));
        assert!(at(&mut m, instance, &[Object::SmallInt(3)]).is_err());
    }

    #[test]
    fn byte_objects_answer_integers_and_characters() {
        let mut m = machine();
        let string = m.image.new_string("abc");
        assert!(matches!(
            at(&mut m, string.clone(), &[Object::SmallInt(1)]),
            Ok(Object::SmallInt(97))
        ));
        assert!(matches!(
            string_at(&mut m, string.clone(), &[Object::SmallInt(2)]),
            Ok(Object::Char('b'))
        ));
        string_at_put(
            &mut m,
            string.clone(),
            &[Object::SmallInt(3), Object::Char('z')],
        )
        .unwrap();
        assert_eq!(string.as_byte_string().unwrap(), "abz");
    }

    #[test]
    fn fixed_classes_refuse_sized_instantiation() {
        let mut m = machine();
        let class =
            class::new_class("Plain", None, InstanceFormat::Fixed, &["a"]);
        let instance = new(&mut m, Object::Class(class.clone()), &[]).unwrap();
        assert!(matches!(
            size(&mut m, instance, &[]),
            Ok(Object::SmallInt(0))
        ));
        assert!(new_sized(
            &mut m,
            Object::Class(class),
            &[Object::SmallInt(3)]
        )
        .is_err());
    }

    #[test]
    fn replace_copies_within_one_object() {
        let mut m = machine();
        let string = m.image.new_string("abcdef");
        replace_from_to(
            &mut m,
            string.clone(),
            &[
                Object::SmallInt(1),
                Object::SmallInt(3),
                string.clone(),
                Object::SmallInt(4),
            ],
        )
        .unwrap();
        assert_eq!(string.as_byte_string().unwrap(), "defdef");
    }

    #[test]
    fn shallow_copies_share_no_storage() {
        let mut m = machine();
        let original = m.image.new_string("abc");
        let copy = shallow_copy(&mut m, original.clone(), &[]).unwrap();
        string_at_put(
            &mut m,
            copy.clone(),
            &[Object::SmallInt(1), Object::Char('x')],
        )
        .unwrap();
        assert_eq!(original.as_byte_string().unwrap(), "abc");
        assert_eq!(copy.as_byte_string().unwrap(), "xbc");
        assert!(matches!(
            identical(&mut m, original, &[copy]),
            Ok(Object::False)
        ));
    }

    #[test]
    fn characters_convert_both_ways() {
        let mut m = machine();
        assert!(matches!(
            character_value(&mut m, Object::SmallInt(65), &[]),
            Ok(Object::Char('A'))
        ));
        assert!(matches!(
            character_value(&mut m, Object::Nil, &[Object::SmallInt(97)]),
            Ok(Object::Char('a'))
        ));
        assert!(
            character_value(&mut m, Object::Nil, &[Object::Nil]).is_err()
        );
    }
}
