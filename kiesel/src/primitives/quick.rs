//! Quick primitives: indices whose whole behavior is "answer this value",
//! compiled for trivial accessors and constant methods. They carry no
//! code of their own, only an action.

use crate::bytecode::SpecialConstant;
use crate::primitives::{PrimitiveAction, PrimitiveSet};

const FIRST_INST_VAR: u16 = 264;
const LAST_INST_VAR: u16 = 519;

pub fn set() -> PrimitiveSet {
    PrimitiveSet {
        name: "quick",
        indexed: Vec::new(),
        named: Vec::new(),
        ranged: Some(resolve),
    }
}

fn resolve(index: u16) -> Option<PrimitiveAction> {
    match index {
        256 => Some(PrimitiveAction::ReturnReceiver),
        257 => Some(PrimitiveAction::ReturnConstant(SpecialConstant::True)),
        258 => Some(PrimitiveAction::ReturnConstant(SpecialConstant::False)),
        259 => Some(PrimitiveAction::ReturnConstant(SpecialConstant::Nil)),
        260 => {
            Some(PrimitiveAction::ReturnConstant(SpecialConstant::MinusOne))
        }
        261 => Some(PrimitiveAction::ReturnConstant(SpecialConstant::Zero)),
        262 => Some(PrimitiveAction::ReturnConstant(SpecialConstant::One)),
        263 => Some(PrimitiveAction::ReturnConstant(SpecialConstant::Two)),
        FIRST_INST_VAR..=LAST_INST_VAR => {
            Some(PrimitiveAction::ReturnInstVar(index - FIRST_INST_VAR))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_indices_map_in_order() {
        assert!(matches!(resolve(256), Some(PrimitiveAction::ReturnReceiver)));
        assert!(matches!(
            resolve(259),
            Some(PrimitiveAction::ReturnConstant(SpecialConstant::Nil))
        ));
        assert!(matches!(
            resolve(263),
            Some(PrimitiveAction::ReturnConstant(SpecialConstant::Two))
        ));
    }

    #[test]
    fn inst_var_indices_are_relative() {
        assert!(matches!(
            resolve(264),
            Some(PrimitiveAction::ReturnInstVar(0))
        ));
        assert!(matches!(
            resolve(519),
            Some(PrimitiveAction::ReturnInstVar(255))
        ));
        assert!(resolve(520).is_none());
        assert!(resolve(255).is_none());
    }
}
