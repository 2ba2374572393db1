// Property-based tests for parsing invariants.
//
// Two categories:
// 1. Signature engine: parse is total over a generated C declaration
//    vocabulary, and render-then-reparse preserves structural equality
// 2. Process calculus: generated well-formed expressions always parse;
//    arbitrary input never panics
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use emg::calculus::parse_expression;
use emg::signature::Signature;
use proptest::prelude::*;

// ── Declaration generator ───────────────────────────────────────────────────

fn arb_base_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("int".to_string()),
        Just("void *".to_string()),
        Just("char *".to_string()),
        Just("unsigned long".to_string()),
        Just("size_t".to_string()),
        Just("struct usb_driver".to_string()),
        Just("struct usb_interface *".to_string()),
        Just("struct nvme_dev *".to_string()),
    ]
}

fn arb_declaration() -> impl Strategy<Value = String> {
    let plain = arb_base_type();
    let function_pointer = (
        prop_oneof![Just("int".to_string()), Just("void".to_string())],
        prop::collection::vec(arb_base_type(), 0..=3),
    )
        .prop_map(|(ret, params)| format!("{} (*f)({})", ret, params.join(", ")));
    prop_oneof![plain, function_pointer]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn declarations_parse(decl in arb_declaration()) {
        Signature::parse(&decl).unwrap();
    }

    #[test]
    fn render_reparse_is_structurally_equal(decl in arb_declaration()) {
        let first = Signature::parse(&decl).unwrap();
        let second = Signature::parse(&first.to_declaration()).unwrap();
        prop_assert!(first.compare(&second).unwrap());
    }

    #[test]
    fn parse_is_deterministic(decl in arb_declaration()) {
        let a = Signature::parse(&decl).unwrap();
        let b = Signature::parse(&decl).unwrap();
        prop_assert!(a.compare(&b).unwrap());
        prop_assert_eq!(a.to_declaration(), b.to_declaration());
    }
}

// ── Process expression generator ────────────────────────────────────────────

fn arb_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("register".to_string()),
        Just("deregister".to_string()),
        Just("probe".to_string()),
        Just("disconnect".to_string()),
        Just("suspend".to_string()),
    ]
}

fn arb_step() -> impl Strategy<Value = String> {
    (
        arb_name(),
        prop_oneof![
            Just("(!"),  // replicative receive
            Just("("),   // receive
            Just("[@"),  // broadcast dispatch
            Just("["),   // dispatch
            Just("<"),   // condition
        ],
        prop::option::of(1u64..5),
    )
        .prop_map(|(name, open, repetition)| {
            let close = match open {
                "(!" | "(" => ")",
                "[@" | "[" => "]",
                _ => ">",
            };
            match repetition {
                Some(n) => format!("{open}{name}[{n}]{close}"),
                None => format!("{open}{name}{close}"),
            }
        })
}

fn arb_process() -> impl Strategy<Value = String> {
    let sequence = || prop::collection::vec(arb_step(), 1..=4).prop_map(|s| s.join("."));
    (sequence(), prop::option::of(sequence()))
        .prop_map(|(left, right)| match right {
            Some(right) => format!("{left} | ({right})"),
            None => left,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn well_formed_expressions_parse(expression in arb_process()) {
        parse_expression("generated", &expression).unwrap();
    }

    #[test]
    fn arbitrary_input_never_panics(input in "[a-z0-9().\\[\\]<>|!@%{} ]{0,40}") {
        let _ = parse_expression("fuzz", &input);
    }
}
