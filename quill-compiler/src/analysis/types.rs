use std::fmt;

use crate::symbols::ClassId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassRef {
    pub id: ClassId,
    pub name: String,
}

/// Static approximation of what a value can be at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Any,
    Nil,
    Boolean,
    Number,
    String,
    Function,
    /// The class object itself, as produced by naming a class.
    Class(ClassRef),
    /// An instance produced by calling a class.
    Instance(ClassRef),
    /// Two or more distinct alternatives, flattened, in first-seen order.
    Union(Vec<Type>),
}

impl Type {
    /// Joins `types` into one type: unions are flattened, duplicates dropped in
    /// first-seen order, and `Any` absorbs everything. An empty input is `Any`.
    pub fn union<I>(types: I) -> Type
    where
        I: IntoIterator<Item = Type>,
    {
        let mut arms: Vec<Type> = Vec::new();
        for ty in types {
            match ty {
                Type::Any => return Type::Any,
                Type::Union(inner) => {
                    for arm in inner {
                        if !arms.contains(&arm) {
                            arms.push(arm);
                        }
                    }
                }
                other => {
                    if !arms.contains(&other) {
                        arms.push(other);
                    }
                }
            }
        }

        match arms.len() {
            0 => Type::Any,
            1 => arms.remove(0),
            _ => Type::Union(arms),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Type::Any => "Any".to_string(),
            Type::Nil => "Nil".to_string(),
            Type::Boolean => "Boolean".to_string(),
            Type::Number => "Number".to_string(),
            Type::String => "String".to_string(),
            Type::Function => "Function".to_string(),
            Type::Class(class) => format!("Class[{}]", class.name),
            Type::Instance(class) => class.name.clone(),
            Type::Union(arms) => arms
                .iter()
                .map(Type::describe)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    pub fn is_union(&self) -> bool {
        matches!(self, Type::Union(_))
    }

    pub fn arms(&self) -> Vec<Type> {
        match self {
            Type::Union(arms) => arms.clone(),
            other => vec![other.clone()],
        }
    }

    /// True when every value of `self` is also a value of `other`.
    pub fn is_assignable_to(&self, other: &Type) -> bool {
        if other.is_any() || self == other {
            return true;
        }
        match self {
            Type::Union(arms) => arms.iter().all(|arm| arm.is_assignable_to(other)),
            _ => match other {
                Type::Union(arms) => arms.contains(self),
                _ => false,
            },
        }
    }

    /// True when some value could belong to both types.
    pub fn overlaps(&self, other: &Type) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        self.arms().iter().any(|arm| other.arms().contains(arm))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
