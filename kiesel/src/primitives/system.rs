//! System primitives: shutdown, scheduler yield, attribute introspection
//! and the image clock.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::interpreter::{Machine, Unwind};
use crate::primitives::{expect_small, fail, PrimitiveDesc, PrimitiveSet};
use crate::value::Object;

/// Microseconds between the image epoch (1901-01-01) and the Unix epoch.
const EPOCH_DELTA_MICROSECONDS: i64 = 2_177_452_800_000_000;

pub fn set() -> PrimitiveSet {
    PrimitiveSet {
        name: "system",
        indexed: vec![
            (113, PrimitiveDesc::new("system_quit", 0, quit)),
            (
                135,
                PrimitiveDesc::new("millisecond_clock", 0, millisecond_clock),
            ),
            (149, PrimitiveDesc::new("system_attribute", 1, attribute)),
            (167, PrimitiveDesc::new("process_yield", 0, yield_process)),
            (
                240,
                PrimitiveDesc::new("utc_microsecond_clock", 0, microsecond_clock),
            ),
        ],
        named: Vec::new(),
        ranged: None,
    }
}

pub fn quit(
    _machine: &mut Machine,
    _receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let status = match args.first() {
        Some(value) => expect_small(value)? as i32,
        None => 0,
    };
    Err(Unwind::Exit { status })
}

/// Answers the string registered under the numeric attribute id, nil when
/// nothing is registered.
pub fn attribute(
    machine: &mut Machine,
    _receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let id = match args.first() {
        Some(value) => expect_small(value)?,
        None => return Err(fail()),
    };
    match machine.attributes.get(&id) {
        Some(text) => {
            let text = text.clone();
            Ok(machine.image.new_string(&text))
        }
        None => Ok(Object::Nil),
    }
}

/// There is only one process, so yielding hands control straight back to
/// the harness.
pub fn yield_process(
    _machine: &mut Machine,
    receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    Err(Unwind::ProcessSwitch { value: receiver })
}

/// Milliseconds since the process started, which is all the callers of
/// this clock use it for (relative timing).
pub fn millisecond_clock(
    machine: &mut Machine,
    _receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    let millis =
        i64::try_from(machine.started.elapsed().as_millis()).map_err(|_| fail())?;
    Ok(Object::SmallInt(millis))
}

pub fn microsecond_clock(
    _machine: &mut Machine,
    _receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    let elapsed =
        SystemTime::now().duration_since(UNIX_EPOCH).map_err(|_| fail())?;
    let micros = i64::try_from(elapsed.as_micros()).map_err(|_| fail())?;
    micros
        .checked_add(EPOCH_DELTA_MICROSECONDS)
        .map(Object::SmallInt)
        .ok_or_else(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn quit_carries_the_requested_status() {
        let mut m = Machine::new(Image::bootstrap());
        assert!(matches!(
            quit(&mut m, Object::Nil, &[]),
            Err(Unwind::Exit { status: 0 })
        ));
        assert!(matches!(
            quit(&mut m, Object::Nil, &[Object::SmallInt(3)]),
            Err(Unwind::Exit { status: 3 })
        ));
    }

    #[test]
    fn attributes_answer_strings_or_nil() {
        let mut m = Machine::new(Image::bootstrap());
        let os = attribute(&mut m, Object::Nil, &[Object::SmallInt(1001)])
            .unwrap();
        assert_eq!(os.as_byte_string().unwrap(), std::env::consts::OS);
        assert!(matches!(
            attribute(&mut m, Object::Nil, &[Object::SmallInt(5555)]),
            Ok(Object::Nil)
        ));
    }

    #[test]
    fn millisecond_clock_is_relative_to_startup() {
        let mut m = Machine::new(Image::bootstrap());
        let Ok(Object::SmallInt(elapsed)) =
            millisecond_clock(&mut m, Object::Nil, &[])
        else {
            panic!("clock failed");
        };
        assert!(elapsed >= 0);
        assert!(elapsed < 60_000);
    }

    #[test]
    fn clock_reports_the_image_epoch() {
        let mut m = Machine::new(Image::bootstrap());
        let Ok(Object::SmallInt(now)) =
            microsecond_clock(&mut m, Object::Nil, &[])
        else {
            panic!("clock failed");
        };
        assert!(now > EPOCH_DELTA_MICROSECONDS);
    }
}
