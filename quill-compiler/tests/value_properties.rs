//! Property-based tests for abstract values: constant folding, numeric bounds and
//! type unions.

use proptest::prelude::*;

use quill_compiler::analysis::value::{apply_binary, apply_unary};
use quill_compiler::{BinaryOperator, Literal, Type, UnaryOperator, Value};

fn leaf_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::Nil),
        Just(Type::Boolean),
        Just(Type::Number),
        Just(Type::String),
        Just(Type::Function),
    ]
}

fn arb_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        4 => leaf_type(),
        1 => Just(Type::Any),
        2 => prop::collection::vec(leaf_type(), 2..4).prop_map(Type::union),
    ]
}

fn finite() -> impl Strategy<Value = f64> {
    -1.0e9..1.0e9f64
}

/// `(min, max)` with `min <= max`.
fn interval() -> impl Strategy<Value = (f64, f64)> {
    (finite(), finite()).prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
}

proptest! {
    #[test]
    fn double_negation_restores_constants(x in finite()) {
        let value = Value::from_constant(Literal::Number(x));
        let twice = apply_unary(
            UnaryOperator::Negative,
            &apply_unary(UnaryOperator::Negative, &value),
        );
        prop_assert_eq!(twice.constant, Some(Literal::Number(x)));
        prop_assert_eq!(twice.ty, Type::Number);
    }

    #[test]
    fn double_negation_restores_bounds((min, max) in interval()) {
        let value = Value::bounded_number(Some(min), Some(max));
        let negated = value.negative();
        prop_assert_eq!(negated.bounds(), (Some(-max), Some(-min)));
        prop_assert_eq!(negated.negative().bounds(), (Some(min), Some(max)));
    }

    #[test]
    fn union_is_idempotent(types in prop::collection::vec(arb_type(), 0..6)) {
        let once = Type::union(types.clone());
        prop_assert_eq!(Type::union([once.clone()]), once.clone());

        let doubled = types.iter().chain(types.iter()).cloned();
        prop_assert_eq!(Type::union(doubled), once);
    }

    #[test]
    fn every_arm_is_assignable_to_the_union(types in prop::collection::vec(arb_type(), 1..6)) {
        let joined = Type::union(types.clone());
        for ty in types {
            prop_assert!(ty.is_assignable_to(&joined), "{} not in {}", ty, joined);
        }
    }

    #[test]
    fn constant_arithmetic_folds(a in finite(), b in finite()) {
        let left = Value::from_constant(Literal::Number(a));
        let right = Value::from_constant(Literal::Number(b));
        let sum = apply_binary(BinaryOperator::Add, &left, &right).expect("numbers add");
        prop_assert_eq!(sum.constant, Some(Literal::Number(a + b)));
        let product = apply_binary(BinaryOperator::Multiply, &left, &right).expect("numbers multiply");
        prop_assert_eq!(product.constant, Some(Literal::Number(a * b)));
    }

    #[test]
    fn modulo_by_positive_constant_is_bounded(
        (min, max) in interval(),
        divisor in 0.5..1.0e6f64,
    ) {
        let left = Value::bounded_number(Some(min), Some(max));
        let right = Value::from_constant(Literal::Number(divisor));
        let result = apply_binary(BinaryOperator::Modulo, &left, &right).expect("number modulo");
        let (low, high) = result.bounds();
        prop_assert_eq!(high, Some(divisor));
        let expected_low = if min >= 0.0 { 0.0 } else { -divisor };
        prop_assert_eq!(low, Some(expected_low));
    }

    #[test]
    fn decided_comparisons_hold_for_every_point(
        (min, max) in interval(),
        bound in finite(),
        position in 0.0..=1.0f64,
    ) {
        let left = Value::bounded_number(Some(min), Some(max));
        let right = Value::from_constant(Literal::Number(bound));
        let sample = (min + position * (max - min)).clamp(min, max);

        let cases = [
            (BinaryOperator::Less, sample < bound),
            (BinaryOperator::LessEqual, sample <= bound),
            (BinaryOperator::Greater, sample > bound),
            (BinaryOperator::GreaterEqual, sample >= bound),
        ];
        for (operator, holds) in cases {
            let result = apply_binary(operator, &left, &right).expect("numbers compare");
            prop_assert_eq!(result.ty, Type::Boolean);
            if let Some(Literal::Boolean(decided)) = result.constant {
                prop_assert_eq!(decided, holds, "{} decided wrongly", operator);
            }
        }
    }

    #[test]
    fn numbers_and_strings_are_truthy(x in finite(), text in ".*") {
        prop_assert_eq!(Value::from_constant(Literal::Number(x)).truthiness(), Some(true));
        prop_assert_eq!(Value::from_constant(Literal::String(text)).truthiness(), Some(true));
        prop_assert_eq!(Value::nil().truthiness(), Some(false));
    }
}
