use std::collections::HashMap;
use std::rc::Rc;

use crate::analysis::types::{ClassRef, Type};
use crate::ast::{
    Expression, ExpressionKind, FunctionDecl, Item, Literal, Module, SourceSpan, TypeAnnotation,
    UnaryOperator,
};
use crate::diagnostics::Diagnostics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub usize);

/// One entry of a member table: what a name can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRef {
    Method(MethodId),
    Class(ClassId),
    Global(GlobalId),
    Field { class: ClassId, index: usize },
    Builtin(Builtin),
}

/// Functions available everywhere without a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Str,
    Num,
}

impl Builtin {
    pub const ALL: [Builtin; 3] = [Builtin::Print, Builtin::Str, Builtin::Num];

    pub fn lookup(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|builtin| builtin.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Str => "str",
            Builtin::Num => "num",
        }
    }

    pub fn parameters(self) -> Vec<ParamInfo> {
        match self {
            Builtin::Print => vec![ParamInfo {
                name: "values".to_string(),
                ty: Type::Any,
                default: None,
                is_variadic: true,
            }],
            Builtin::Str | Builtin::Num => vec![ParamInfo {
                name: "value".to_string(),
                ty: Type::Any,
                default: None,
                is_variadic: false,
            }],
        }
    }

    pub fn return_type(self) -> Type {
        match self {
            Builtin::Print => Type::Nil,
            Builtin::Str => Type::String,
            Builtin::Num => Type::Number,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    /// Declared type, `Any` when unannotated.
    pub ty: Type,
    /// Present when the parameter has a default value: the literal if it is one.
    pub default: Option<ParamDefault>,
    pub is_variadic: bool,
}

#[derive(Debug, Clone)]
pub enum ParamDefault {
    Literal(Literal),
    Expression,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub owner: Option<ClassId>,
    pub params: Vec<ParamInfo>,
    pub return_type: Option<Type>,
    pub declaration: Rc<FunctionDecl>,
}

impl MethodDecl {
    /// Number of arguments a call must supply at minimum.
    pub fn min_arity(&self) -> usize {
        min_arity(&self.params)
    }

    /// Upper bound on arguments, `None` when a variadic parameter accepts the rest.
    pub fn max_arity(&self) -> Option<usize> {
        max_arity(&self.params)
    }
}

pub fn min_arity(params: &[ParamInfo]) -> usize {
    params
        .iter()
        .filter(|param| param.default.is_none() && !param.is_variadic)
        .count()
}

pub fn max_arity(params: &[ParamInfo]) -> Option<usize> {
    if params.iter().any(|param| param.is_variadic) {
        None
    } else {
        Some(params.len())
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: String,
    pub span: SourceSpan,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodId>,
}

impl ClassInfo {
    pub fn class_ref(&self) -> ClassRef {
        ClassRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalInfo {
    pub name: String,
    pub is_const: bool,
    pub ty: Type,
    /// Folded initializer of a `const` binding.
    pub constant: Option<Literal>,
    pub span: SourceSpan,
}

/// Module-level member table plus per-class member tables, in declaration order.
#[derive(Debug, Default)]
pub struct SymbolTable {
    methods: Vec<MethodDecl>,
    classes: Vec<ClassInfo>,
    globals: Vec<GlobalInfo>,
    module_members: Vec<(String, MemberRef)>,
    class_index: HashMap<String, ClassId>,
}

impl SymbolTable {
    pub fn build(module: &Module) -> (SymbolTable, Diagnostics) {
        let mut builder = SymbolBuilder {
            table: SymbolTable::default(),
            diagnostics: Diagnostics::new(),
        };
        builder.collect(module);
        (builder.table, builder.diagnostics)
    }

    pub fn method(&self, id: MethodId) -> &MethodDecl {
        &self.methods[id.0]
    }

    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodDecl)> {
        self.methods
            .iter()
            .enumerate()
            .map(|(index, method)| (MethodId(index), method))
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0]
    }

    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    pub fn global(&self, id: GlobalId) -> &GlobalInfo {
        &self.globals[id.0]
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(name).copied()
    }

    /// First module member declared under `name`.
    pub fn get_member(&self, name: &str) -> Option<MemberRef> {
        self.module_members
            .iter()
            .find(|(member_name, _)| member_name == name)
            .map(|(_, member)| *member)
    }

    /// Every module member declared under `name`, in declaration order.
    pub fn get_members(&self, name: &str) -> Vec<MemberRef> {
        self.module_members
            .iter()
            .filter(|(member_name, _)| member_name == name)
            .map(|(_, member)| *member)
            .collect()
    }

    /// Fields named `name` come first, then every method overload of that name.
    pub fn class_members(&self, class: ClassId, name: &str) -> Vec<MemberRef> {
        let info = self.class(class);
        let mut members: Vec<MemberRef> = info
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.name == name)
            .map(|(index, _)| MemberRef::Field { class, index })
            .collect();
        members.extend(
            info.methods
                .iter()
                .filter(|id| self.method(**id).name == name)
                .map(|id| MemberRef::Method(*id)),
        );
        members
    }

    pub fn field(&self, class: ClassId, index: usize) -> &FieldInfo {
        &self.class(class).fields[index]
    }

    /// `Class.method` for methods, the bare name for module functions.
    pub fn qualified_name(&self, id: MethodId) -> String {
        let method = self.method(id);
        match method.owner {
            Some(owner) => format!("{}.{}", self.class(owner).name, method.name),
            None => method.name.clone(),
        }
    }

    pub fn member_name(&self, member: MemberRef) -> String {
        match member {
            MemberRef::Method(id) => self.qualified_name(id),
            MemberRef::Class(id) => self.class(id).name.clone(),
            MemberRef::Global(id) => self.global(id).name.clone(),
            MemberRef::Field { class, index } => {
                format!("{}.{}", self.class(class).name, self.field(class, index).name)
            }
            MemberRef::Builtin(builtin) => builtin.name().to_string(),
        }
    }

    /// Parameter list of a callable member, `None` for fields, globals and classes.
    pub fn parameters(&self, member: MemberRef) -> Option<Vec<ParamInfo>> {
        match member {
            MemberRef::Method(id) => Some(self.method(id).params.clone()),
            MemberRef::Builtin(builtin) => Some(builtin.parameters()),
            _ => None,
        }
    }

    pub fn class_type(&self, id: ClassId) -> Type {
        Type::Class(self.class(id).class_ref())
    }

    pub fn instance_type(&self, id: ClassId) -> Type {
        Type::Instance(self.class(id).class_ref())
    }
}

struct SymbolBuilder {
    table: SymbolTable,
    diagnostics: Diagnostics,
}

impl SymbolBuilder {
    fn collect(&mut self, module: &Module) {
        // classes first so annotations can name classes declared later in the file
        for item in &module.items {
            if let Item::Class(class) = item {
                if self.table.class_index.contains_key(&class.name) {
                    self.diagnostics.push_error_with_span(
                        format!("duplicate class '{}'", class.name),
                        Some(class.name_span),
                    );
                    continue;
                }
                let id = ClassId(self.table.classes.len());
                self.table.class_index.insert(class.name.clone(), id);
                self.table.classes.push(ClassInfo {
                    id,
                    name: class.name.clone(),
                    span: class.name_span,
                    fields: Vec::new(),
                    methods: Vec::new(),
                });
            }
        }

        for item in &module.items {
            match item {
                Item::Function(function) => {
                    if let Some(MemberRef::Class(_) | MemberRef::Global(_)) =
                        self.table.get_member(&function.name)
                    {
                        self.diagnostics.push_error_with_span(
                            format!("'{}' is already declared", function.name),
                            Some(function.name_span),
                        );
                        continue;
                    }
                    let id = self.add_method(function, None);
                    self.table
                        .module_members
                        .push((function.name.clone(), MemberRef::Method(id)));
                }
                Item::Class(class) => {
                    let Some(id) = self.table.find_class(&class.name) else {
                        continue;
                    };
                    if self.table.classes[id.0].span != class.name_span {
                        // duplicate declaration, already reported
                        continue;
                    }
                    if self.table.get_member(&class.name).is_some() {
                        self.diagnostics.push_error_with_span(
                            format!("'{}' is already declared", class.name),
                            Some(class.name_span),
                        );
                    }
                    self.table
                        .module_members
                        .push((class.name.clone(), MemberRef::Class(id)));

                    let mut fields: Vec<FieldInfo> = Vec::new();
                    for field in &class.fields {
                        if fields.iter().any(|existing| existing.name == field.name) {
                            self.diagnostics.push_error_with_span(
                                format!("duplicate field '{}' in class '{}'", field.name, class.name),
                                Some(field.span),
                            );
                            continue;
                        }
                        let ty = self.binding_type(
                            field.type_annotation.as_ref(),
                            field.initializer.as_ref(),
                        );
                        fields.push(FieldInfo {
                            name: field.name.clone(),
                            ty,
                            span: field.span,
                        });
                    }
                    self.table.classes[id.0].fields = fields;

                    for method in &class.methods {
                        if self.table.classes[id.0]
                            .fields
                            .iter()
                            .any(|field| field.name == method.name)
                        {
                            // fields win member lookup
                            self.diagnostics.push_warning_with_span(
                                format!(
                                    "method '{}' is shadowed by a field of class '{}'",
                                    method.name, class.name
                                ),
                                Some(method.name_span),
                            );
                        }
                        let method_id = self.add_method(method, Some(id));
                        self.table.classes[id.0].methods.push(method_id);
                    }
                }
                Item::Global(global) => {
                    if self.table.get_member(&global.name).is_some() {
                        self.diagnostics.push_error_with_span(
                            format!("'{}' is already declared", global.name),
                            Some(global.span),
                        );
                        continue;
                    }
                    let ty =
                        self.binding_type(global.type_annotation.as_ref(), Some(&global.initializer));
                    let constant = if global.is_const {
                        literal_of(&global.initializer)
                    } else {
                        None
                    };
                    let id = GlobalId(self.table.globals.len());
                    self.table.globals.push(GlobalInfo {
                        name: global.name.clone(),
                        is_const: global.is_const,
                        ty,
                        constant,
                        span: global.span,
                    });
                    self.table
                        .module_members
                        .push((global.name.clone(), MemberRef::Global(id)));
                }
            }
        }
    }

    fn add_method(&mut self, function: &FunctionDecl, owner: Option<ClassId>) -> MethodId {
        let params = function
            .parameters
            .iter()
            .map(|param| ParamInfo {
                name: param.name.clone(),
                ty: param
                    .type_annotation
                    .as_ref()
                    .map(|annotation| self.resolve_annotation(annotation))
                    .unwrap_or(Type::Any),
                default: param.default_value.as_ref().map(|value| {
                    literal_of(value)
                        .map(ParamDefault::Literal)
                        .unwrap_or(ParamDefault::Expression)
                }),
                is_variadic: param.is_variadic,
            })
            .collect();
        let return_type = function
            .return_type
            .as_ref()
            .map(|annotation| self.resolve_annotation(annotation));

        let id = MethodId(self.table.methods.len());
        self.table.methods.push(MethodDecl {
            name: function.name.clone(),
            owner,
            params,
            return_type,
            declaration: Rc::new(function.clone()),
        });
        id
    }

    /// Declared type if annotated, else the literal initializer's type, else `Any`.
    fn binding_type(
        &mut self,
        annotation: Option<&TypeAnnotation>,
        initializer: Option<&Expression>,
    ) -> Type {
        if let Some(annotation) = annotation {
            return self.resolve_annotation(annotation);
        }
        initializer
            .and_then(literal_of)
            .map(|literal| literal_type(&literal))
            .unwrap_or(Type::Any)
    }

    fn resolve_annotation(&mut self, annotation: &TypeAnnotation) -> Type {
        match annotation.name.as_str() {
            "Any" => Type::Any,
            "Nil" => Type::Nil,
            "Boolean" => Type::Boolean,
            "Number" => Type::Number,
            "String" => Type::String,
            "Function" => Type::Function,
            name => match self.table.find_class(name) {
                Some(id) => self.table.instance_type(id),
                None => {
                    self.diagnostics.push_error_with_span(
                        format!("unknown type '{name}'"),
                        Some(annotation.span),
                    );
                    Type::Any
                }
            },
        }
    }
}

pub fn literal_type(literal: &Literal) -> Type {
    match literal {
        Literal::Number(_) => Type::Number,
        Literal::String(_) => Type::String,
        Literal::Boolean(_) => Type::Boolean,
        Literal::Nil => Type::Nil,
    }
}

/// Literal value of `expression` when it is a literal, possibly negated or grouped.
fn literal_of(expression: &Expression) -> Option<Literal> {
    match &expression.kind {
        ExpressionKind::Literal(literal) => Some(literal.clone()),
        ExpressionKind::Grouping(inner) => literal_of(inner),
        ExpressionKind::Unary(unary) if unary.operator == UnaryOperator::Negative => {
            match literal_of(&unary.operand)? {
                Literal::Number(value) => Some(Literal::Number(-value)),
                _ => None,
            }
        }
        _ => None,
    }
}
