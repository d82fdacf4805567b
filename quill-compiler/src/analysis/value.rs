use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::types::Type;
use crate::ast::{BinaryOperator, Literal, UnaryOperator};
use crate::symbols::{literal_type, MemberRef, SymbolTable};

pub const MIN_PROPERTY: &str = "min";
pub const MAX_PROPERTY: &str = "max";

/// Symbolic approximation of a runtime value at one program point.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: Type,
    pub constant: Option<Literal>,
    /// Receiver this value was loaded from; never keeps the receiver alive.
    pub target: Option<Weak<Value>>,
    /// Candidates when the value names a possibly overloaded function or a class.
    pub members: Option<Vec<MemberRef>>,
    /// Memoized member lookups and numeric bounds.
    pub properties: HashMap<String, Rc<Value>>,
}

impl Value {
    pub fn of_type(ty: Type) -> Self {
        Self {
            ty,
            constant: None,
            target: None,
            members: None,
            properties: HashMap::new(),
        }
    }

    pub fn any() -> Self {
        Self::of_type(Type::Any)
    }

    pub fn nil() -> Self {
        Self::from_constant(Literal::Nil)
    }

    pub fn from_constant(literal: Literal) -> Self {
        let mut value = Self::of_type(literal_type(&literal));
        value.constant = Some(literal);
        value
    }

    /// A function when the first candidate is a method or builtin, otherwise the
    /// class named by the first candidate.
    pub fn from_members(
        target: Option<Weak<Value>>,
        members: Vec<MemberRef>,
        symbols: &SymbolTable,
    ) -> Self {
        let ty = match members.first() {
            Some(MemberRef::Method(_)) | Some(MemberRef::Builtin(_)) => Type::Function,
            Some(MemberRef::Class(id)) => symbols.class_type(*id),
            _ => Type::Any,
        };
        Self {
            ty,
            constant: None,
            target,
            members: Some(members),
            properties: HashMap::new(),
        }
    }

    /// Independent clone: properties are copied recursively, target and members shared.
    pub fn copy(&self) -> Self {
        Self {
            ty: self.ty.clone(),
            constant: self.constant.clone(),
            target: self.target.clone(),
            members: self.members.clone(),
            properties: self
                .properties
                .iter()
                .map(|(name, value)| (name.clone(), Rc::new(value.copy())))
                .collect(),
        }
    }

    pub fn number(&self) -> Option<f64> {
        match self.constant {
            Some(Literal::Number(value)) => Some(value),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&str> {
        match &self.constant {
            Some(Literal::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn boolean(&self) -> Option<bool> {
        match self.constant {
            Some(Literal::Boolean(value)) => Some(value),
            _ => None,
        }
    }

    /// Known lower and upper bounds of a number.
    pub fn bounds(&self) -> (Option<f64>, Option<f64>) {
        if let Some(value) = self.number() {
            return (Some(value), Some(value));
        }
        let bound = |name: &str| self.properties.get(name).and_then(|value| value.number());
        (bound(MIN_PROPERTY), bound(MAX_PROPERTY))
    }

    /// A non-constant number limited to `[min, max]` where known.
    pub fn bounded_number(min: Option<f64>, max: Option<f64>) -> Self {
        let mut value = Self::of_type(Type::Number);
        if let Some(min) = min {
            value.properties.insert(
                MIN_PROPERTY.to_string(),
                Rc::new(Self::from_constant(Literal::Number(min))),
            );
        }
        if let Some(max) = max {
            value.properties.insert(
                MAX_PROPERTY.to_string(),
                Rc::new(Self::from_constant(Literal::Number(max))),
            );
        }
        value
    }

    /// Exact on constants; otherwise swaps and negates the known bounds.
    /// Values that are not numbers come back unchanged.
    pub fn negative(&self) -> Self {
        if let Some(value) = self.number() {
            return Self::from_constant(Literal::Number(-value));
        }
        if self.ty != Type::Number {
            return self.copy();
        }
        let (min, max) = self.bounds();
        Self::bounded_number(max.map(|max| -max), min.map(|min| -min))
    }

    pub fn positive(&self) -> Self {
        self.copy()
    }

    /// Known truthiness: `nil` and `false` are falsy, every other value is truthy.
    pub fn truthiness(&self) -> Option<bool> {
        match (&self.constant, &self.ty) {
            (Some(Literal::Nil), _) | (_, Type::Nil) => Some(false),
            (Some(Literal::Boolean(value)), _) => Some(*value),
            (Some(_), _) => Some(true),
            (
                _,
                Type::Number | Type::String | Type::Function | Type::Class(_) | Type::Instance(_),
            ) => Some(true),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.constant {
            Some(literal) => format!("{} ({literal})", self.ty.describe()),
            None => self.ty.describe(),
        }
    }
}

/// `+` and `-` go through `positive`/`negative`; `!` folds to a boolean.
pub fn apply_unary(operator: UnaryOperator, operand: &Value) -> Value {
    match operator {
        UnaryOperator::Positive => operand.positive(),
        UnaryOperator::Negative => operand.negative(),
        UnaryOperator::Not => match operand.truthiness() {
            Some(truthy) => Value::from_constant(Literal::Boolean(!truthy)),
            None => Value::of_type(Type::Boolean),
        },
    }
}

/// Result of a binary operator, or `None` when the operand pair has no rule.
pub fn apply_binary(operator: BinaryOperator, left: &Value, right: &Value) -> Option<Value> {
    use BinaryOperator::*;

    match operator {
        Add => add(left, right),
        Subtract | Multiply | Divide | Modulo => arithmetic(operator, left, right),
        Equal | NotEqual => Some(equality(operator, left, right)),
        Less | LessEqual | Greater | GreaterEqual => comparison(operator, left, right),
        And | Or => Some(logical(operator, left, right)),
    }
}

fn add(left: &Value, right: &Value) -> Option<Value> {
    match (&left.ty, &right.ty) {
        (Type::Number, Type::Number) => {
            if let (Some(a), Some(b)) = (left.number(), right.number()) {
                return Some(Value::from_constant(Literal::Number(a + b)));
            }
            let (left_min, left_max) = left.bounds();
            let (right_min, right_max) = right.bounds();
            Some(Value::bounded_number(
                sum(left_min, right_min),
                sum(left_max, right_max),
            ))
        }
        (Type::String, Type::String) | (Type::String, Type::Number) | (Type::Number, Type::String) => {
            match (&left.constant, &right.constant) {
                (Some(a), Some(b)) => Some(Value::from_constant(Literal::String(format!(
                    "{}{}",
                    plain_text(a),
                    plain_text(b)
                )))),
                _ => Some(Value::of_type(Type::String)),
            }
        }
        _ => None,
    }
}

fn arithmetic(operator: BinaryOperator, left: &Value, right: &Value) -> Option<Value> {
    match (&left.ty, &right.ty) {
        (Type::Number, Type::Number) => {}
        // the result is a number whenever the operation succeeds
        (Type::Number, Type::Any) | (Type::Any, Type::Number) => {
            return Some(Value::of_type(Type::Number))
        }
        _ => return None,
    }

    if let (Some(a), Some(b)) = (left.number(), right.number()) {
        let folded = match operator {
            BinaryOperator::Subtract => Some(a - b),
            BinaryOperator::Multiply => Some(a * b),
            BinaryOperator::Divide if b != 0.0 => Some(a / b),
            BinaryOperator::Modulo if b != 0.0 => Some(a % b),
            _ => None,
        };
        if let Some(folded) = folded {
            return Some(Value::from_constant(Literal::Number(folded)));
        }
    }

    let value = match operator {
        BinaryOperator::Subtract => {
            let (left_min, left_max) = left.bounds();
            let (right_min, right_max) = right.bounds();
            Value::bounded_number(
                difference(left_min, right_max),
                difference(left_max, right_min),
            )
        }
        BinaryOperator::Modulo => match right.number() {
            Some(divisor) if divisor > 0.0 => {
                let (left_min, _) = left.bounds();
                let min = if left_min.is_some_and(|min| min >= 0.0) {
                    0.0
                } else {
                    -divisor
                };
                Value::bounded_number(Some(min), Some(divisor))
            }
            _ => Value::of_type(Type::Number),
        },
        _ => Value::of_type(Type::Number),
    };
    Some(value)
}

fn equality(operator: BinaryOperator, left: &Value, right: &Value) -> Value {
    let equal = match (&left.constant, &right.constant) {
        (Some(a), Some(b)) => Some(a == b),
        _ if !left.ty.overlaps(&right.ty) => Some(false),
        _ => None,
    };
    match equal {
        Some(equal) => {
            let result = if operator == BinaryOperator::Equal {
                equal
            } else {
                !equal
            };
            Value::from_constant(Literal::Boolean(result))
        }
        None => Value::of_type(Type::Boolean),
    }
}

fn comparison(operator: BinaryOperator, left: &Value, right: &Value) -> Option<Value> {
    let decided = match (&left.ty, &right.ty) {
        (Type::Number, Type::Number) => {
            let (left_min, left_max) = left.bounds();
            let (right_min, right_max) = right.bounds();
            let below = |a: Option<f64>, b: Option<f64>, strict: bool| match (a, b) {
                (Some(a), Some(b)) => {
                    if strict {
                        a < b
                    } else {
                        a <= b
                    }
                }
                _ => false,
            };
            // left < right holds for sure when left_max < right_min, fails for sure
            // when left_min >= right_max
            match operator {
                BinaryOperator::Less => decide(
                    below(left_max, right_min, true),
                    below(right_max, left_min, false),
                ),
                BinaryOperator::LessEqual => decide(
                    below(left_max, right_min, false),
                    below(right_max, left_min, true),
                ),
                BinaryOperator::Greater => decide(
                    below(right_max, left_min, true),
                    below(left_max, right_min, false),
                ),
                _ => decide(
                    below(right_max, left_min, false),
                    below(left_max, right_min, true),
                ),
            }
        }
        (Type::String, Type::String) => match (left.string(), right.string()) {
            (Some(a), Some(b)) => Some(match operator {
                BinaryOperator::Less => a < b,
                BinaryOperator::LessEqual => a <= b,
                BinaryOperator::Greater => a > b,
                _ => a >= b,
            }),
            _ => None,
        },
        _ => return None,
    };

    Some(match decided {
        Some(result) => Value::from_constant(Literal::Boolean(result)),
        None => Value::of_type(Type::Boolean),
    })
}

fn decide(always: bool, never: bool) -> Option<bool> {
    if always {
        Some(true)
    } else if never {
        Some(false)
    } else {
        None
    }
}

fn logical(operator: BinaryOperator, left: &Value, right: &Value) -> Value {
    if left.ty == Type::Boolean && right.ty == Type::Boolean {
        let folded = match (operator, left.boolean(), right.boolean()) {
            (BinaryOperator::And, Some(false), _) | (BinaryOperator::And, _, Some(false)) => {
                Some(false)
            }
            (BinaryOperator::And, Some(true), Some(true)) => Some(true),
            (BinaryOperator::Or, Some(true), _) | (BinaryOperator::Or, _, Some(true)) => Some(true),
            (BinaryOperator::Or, Some(false), Some(false)) => Some(false),
            _ => None,
        };
        return match folded {
            Some(result) => Value::from_constant(Literal::Boolean(result)),
            None => Value::of_type(Type::Boolean),
        };
    }
    Value::of_type(Type::union([left.ty.clone(), right.ty.clone()]))
}

fn sum(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? + b?)
}

fn difference(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

fn plain_text(literal: &Literal) -> String {
    match literal {
        Literal::String(value) => value.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(value: f64) -> Value {
        Value::from_constant(Literal::Number(value))
    }

    #[test]
    fn constants_map_to_their_types() {
        assert_eq!(Value::from_constant(Literal::Boolean(true)).ty, Type::Boolean);
        assert_eq!(number(1.0).ty, Type::Number);
        assert_eq!(
            Value::from_constant(Literal::String("a".into())).ty,
            Type::String
        );
        assert_eq!(Value::nil().ty, Type::Nil);
    }

    #[test]
    fn negative_swaps_bounds() {
        let value = Value::bounded_number(Some(1.0), Some(5.0));
        assert_eq!(value.negative().bounds(), (Some(-5.0), Some(-1.0)));
        assert_eq!(value.negative().negative().bounds(), (Some(1.0), Some(5.0)));
    }

    #[test]
    fn modulo_by_positive_constant_bounds_result() {
        let dividend = Value::bounded_number(Some(0.0), None);
        let result = apply_binary(BinaryOperator::Modulo, &dividend, &number(10.0)).unwrap();
        assert_eq!(result.bounds(), (Some(0.0), Some(10.0)));
        let decided = apply_binary(BinaryOperator::Less, &result, &number(20.0)).unwrap();
        assert_eq!(decided.boolean(), Some(true));
        let undecided = apply_binary(BinaryOperator::Less, &result, &number(5.0)).unwrap();
        assert_eq!(undecided.constant, None);
        assert_eq!(undecided.ty, Type::Boolean);
    }

    #[test]
    fn string_concatenation_folds() {
        let left = Value::from_constant(Literal::String("n=".into()));
        let result = apply_binary(BinaryOperator::Add, &left, &number(3.0)).unwrap();
        assert_eq!(result.string(), Some("n=3"));
    }

    #[test]
    fn unimplemented_pair_has_no_rule() {
        let left = Value::of_type(Type::Boolean);
        assert!(apply_binary(BinaryOperator::Multiply, &left, &number(2.0)).is_none());
        assert!(apply_binary(BinaryOperator::Add, &Value::any(), &number(2.0)).is_none());
    }

    #[test]
    fn copy_does_not_share_properties() {
        let original = Value::bounded_number(Some(0.0), Some(1.0));
        let mut copied = original.copy();
        copied.properties.remove(MIN_PROPERTY);
        assert_eq!(original.bounds(), (Some(0.0), Some(1.0)));
        assert_eq!(copied.bounds(), (None, Some(1.0)));
    }
}
