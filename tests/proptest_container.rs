//! Property tests for the binary container: serializing any well-formed
//! program and loading it back yields the same program, byte layout is
//! deterministic, and corrupted headers never load.

mod common;

use proptest::prelude::*;

use pyvm::bytecode::file::{load, serialize, MAGIC};
use pyvm::bytecode::op::Op;
use pyvm::bytecode::program::{
    Constant, DebugEntry, Program, Symbol, SymbolKind, FLAG_DEBUG, FORMAT_VERSION,
};

fn arb_constant() -> impl Strategy<Value = Constant> {
    prop_oneof![
        any::<i32>().prop_map(Constant::Integer),
        (-1.0e12f64..1.0e12f64).prop_map(Constant::Float),
        "[a-zA-Z0-9 _.,!?]{0,16}".prop_map(Constant::String),
        any::<bool>().prop_map(Constant::Bool),
    ]
}

/// A straight-line instruction referencing only in-range table entries.
fn arb_instruction(const_count: usize, var_count: usize) -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        (0..const_count).prop_map(|i| vec![Op::LoadConst as u8, i as u8]),
        (0..var_count).prop_map(|i| vec![Op::LoadVar as u8, i as u8]),
        (0..var_count).prop_map(|i| vec![Op::StoreVar as u8, i as u8]),
        Just(vec![Op::Nop as u8]),
        Just(vec![Op::Pop as u8]),
        Just(vec![Op::Dup as u8]),
        Just(vec![Op::Add as u8]),
        Just(vec![Op::CmpEq as u8]),
    ]
}

prop_compose! {
    fn arb_program()(
        constants in prop::collection::vec(arb_constant(), 1..8),
        var_count in 1usize..5,
        instructions in prop::collection::vec(arb_instruction(1, 1), 0..12),
        with_debug in any::<bool>(),
    ) -> Program {
        let symbols: Vec<Symbol> = (0..var_count)
            .map(|i| Symbol {
                kind: SymbolKind::Var,
                name: format!("v{}", i),
                value: i as u32,
            })
            .collect();

        // Instruction strategies index table 0; always valid since both
        // tables are non-empty.
        let mut code: Vec<u8> = instructions.into_iter().flatten().collect();
        code.push(Op::Halt as u8);

        let debug = if with_debug {
            Some(vec![DebugEntry { pc: 0, line: 1, column: 1 }])
        } else {
            None
        };
        let flags = if with_debug { FLAG_DEBUG } else { 0 };

        Program {
            version: FORMAT_VERSION,
            flags,
            constants,
            symbols,
            code,
            debug,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// load(serialize(P)) == P, including table order.
    #[test]
    fn round_trip_preserves_program(program in arb_program()) {
        let bytes = serialize(&program);
        let loaded = load(&bytes).expect("well-formed program loads");
        prop_assert_eq!(loaded, program);
    }

    /// Serialization is a pure function of the program.
    #[test]
    fn serialization_is_deterministic(program in arb_program()) {
        prop_assert_eq!(serialize(&program), serialize(&program));
    }

    /// The header always starts with the magic and the current version.
    #[test]
    fn header_layout_is_stable(program in arb_program()) {
        let bytes = serialize(&program);
        prop_assert_eq!(&bytes[0..4], MAGIC.as_slice());
        prop_assert_eq!(
            u16::from_le_bytes([bytes[4], bytes[5]]),
            FORMAT_VERSION
        );
        let code_size = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        prop_assert_eq!(code_size as usize, program.code.len());
    }

    /// Any single-byte corruption of the magic makes the file unloadable.
    #[test]
    fn corrupted_magic_never_loads(program in arb_program(), byte in 0usize..4, value in any::<u8>()) {
        let mut bytes = serialize(&program);
        prop_assume!(bytes[byte] != value);
        bytes[byte] = value;
        prop_assert!(load(&bytes).is_err());
    }

    /// Every strict prefix of a serialized program fails to load.
    #[test]
    fn truncation_never_loads(program in arb_program(), keep in 0.0f64..1.0) {
        let bytes = serialize(&program);
        let cut = ((bytes.len() - 1) as f64 * keep) as usize;
        prop_assert!(load(&bytes[..cut]).is_err());
    }
}

#[test]
fn round_trip_of_compiled_program() {
    let program = common::compile("x = 10\ny = 20\nprint(x + y)\n");
    let loaded = load(&serialize(&program)).expect("loads");
    assert_eq!(loaded, program);
}
