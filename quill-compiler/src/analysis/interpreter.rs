use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::branch::{Branch, BranchArena, BranchId, RootScope, Termination};
use super::error::AnalysisError;
use super::overload::resolve_overload;
use super::types::Type;
use super::value::{apply_binary, apply_unary, Value, MAX_PROPERTY, MIN_PROPERTY};
use super::{AnalysisOptions, ForkMode};
use crate::ast::{Expression, Literal, SourceSpan};
use crate::diagnostics::{DiagnosticKind, DiagnosticLevel, Diagnostics};
use crate::ir::{lower_expression, lower_function, Instruction, InstructionSet, LoweringError, Slot};
use crate::symbols::{
    literal_type, Builtin, ClassId, MemberRef, MethodDecl, MethodId, ParamDefault, SymbolTable,
};

const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Identity of one call for recursion detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    method: MethodId,
    receiver: Option<Type>,
    arguments: Vec<Type>,
}

/// Return-memo identity: the call plus what its values carry beyond their types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    call: CallKey,
    receiver: Option<ValueKey>,
    arguments: Vec<ValueKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ValueKey {
    constant: Option<ConstantKey>,
    bounds: (Option<u64>, Option<u64>),
    members: Option<Vec<MemberRef>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Number(u64),
    String(String),
    Boolean(bool),
    Nil,
}

impl ValueKey {
    fn of(value: &Value) -> Self {
        let constant = value.constant.as_ref().map(|literal| match literal {
            Literal::Number(number) => ConstantKey::Number(number.to_bits()),
            Literal::String(text) => ConstantKey::String(text.clone()),
            Literal::Boolean(flag) => ConstantKey::Boolean(*flag),
            Literal::Nil => ConstantKey::Nil,
        });
        let (min, max) = value.bounds();
        Self {
            constant,
            bounds: (min.map(f64::to_bits), max.map(f64::to_bits)),
            members: value.members.clone(),
        }
    }
}

/// Terminal branches produced by resolving one instruction set.
#[derive(Debug)]
pub struct Resolution {
    pub arena: BranchArena,
    pub terminals: Vec<BranchId>,
    pub instructions: Rc<InstructionSet>,
}

impl Resolution {
    fn empty() -> Self {
        Self {
            arena: BranchArena::new(),
            terminals: Vec::new(),
            instructions: Rc::new(InstructionSet::new()),
        }
    }

    pub fn terminals(&self) -> &[BranchId] {
        &self.terminals
    }

    pub fn branch(&self, id: BranchId) -> &Branch {
        self.arena.get(id)
    }

    /// Returned values, leaving out loop cutoffs unless nothing else terminated.
    pub fn return_values(&self) -> Vec<Rc<Value>> {
        let returned = |include_cutoffs: bool| {
            self.terminals
                .iter()
                .map(|id| self.arena.get(*id))
                .filter(|branch| include_cutoffs || branch.termination != Some(Termination::LoopCutoff))
                .filter_map(|branch| branch.returned.clone())
                .collect::<Vec<_>>()
        };
        let values = returned(false);
        if values.is_empty() {
            returned(true)
        } else {
            values
        }
    }

    pub fn return_type(&self) -> Type {
        Type::union(self.return_values().iter().map(|value| value.ty.clone()))
    }

    /// Union of the types `span`'s expression held on every path that reached it.
    pub fn type_at(&self, span: SourceSpan) -> Option<Type> {
        let slot = self.instructions.slot_for(span)?;
        let types: Vec<Type> = self
            .terminals
            .iter()
            .filter_map(|id| self.arena.lookup_slot(*id, slot))
            .map(|value| value.ty.clone())
            .collect();
        if types.is_empty() {
            None
        } else {
            Some(Type::union(types))
        }
    }
}

pub struct Analyzer<'a> {
    symbols: &'a SymbolTable,
    options: AnalysisOptions,
    diagnostics: Diagnostics,
    instruction_cache: HashMap<MethodId, Option<Rc<InstructionSet>>>,
    call_stack: Vec<CallKey>,
    return_memo: HashMap<MemoKey, Vec<Rc<Value>>>,
    /// Recursion cutoffs taken so far; results computed across one are not memoized.
    cutoffs: usize,
}

impl<'a> Analyzer<'a> {
    pub fn new(symbols: &'a SymbolTable, options: AnalysisOptions) -> Self {
        Self {
            symbols,
            options,
            diagnostics: Diagnostics::new(),
            instruction_cache: HashMap::new(),
            call_stack: Vec::new(),
            return_memo: HashMap::new(),
            cutoffs: 0,
        }
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    /// Lowered body of `method`, computed on first access. `None` when lowering failed.
    pub fn instructions(&mut self, method: MethodId) -> Option<Rc<InstructionSet>> {
        if let Some(cached) = self.instruction_cache.get(&method) {
            return cached.clone();
        }
        let symbols = self.symbols;
        let lowered = match lower_function(&symbols.method(method).declaration) {
            Ok(set) => {
                debug!(
                    target: "quill::lower",
                    method = %symbols.qualified_name(method),
                    instructions = set.len(),
                    "lowered method body"
                );
                Some(Rc::new(set))
            }
            Err(error) => {
                self.report_lowering_error(&error);
                None
            }
        };
        self.instruction_cache.insert(method, lowered.clone());
        lowered
    }

    pub fn resolve_method(&mut self, method: MethodId) -> Resolution {
        let symbols = self.symbols;
        let declaration = symbols.method(method);
        let Some(instructions) = self.instructions(method) else {
            return Resolution::empty();
        };

        let mut arena = BranchArena::new();
        let root = arena.root(RootScope {
            method: Some(method),
            owner: declaration.owner,
        });
        let receiver = self.bind_parameters(&mut arena, root, declaration, None, &[]);
        let key = CallKey {
            method,
            receiver: receiver.map(|value| value.ty.clone()),
            arguments: declaration.params.iter().map(|param| param.ty.clone()).collect(),
        };

        self.call_stack.push(key);
        let terminals = self.resolve(&mut arena, &instructions, root, 0);
        self.call_stack.pop();

        Resolution {
            arena,
            terminals,
            instructions,
        }
    }

    /// Inferred return type of `method`, as callers see it.
    pub fn return_type(&mut self, method: MethodId) -> Type {
        let resolution = self.resolve_method(method);
        if resolution.terminals.is_empty() {
            return Type::Any;
        }
        let declared = self.symbols.method(method).return_type.clone();
        let values = coerce_returns(resolution.return_values(), declared.as_ref());
        Type::union(values.iter().map(|value| value.ty.clone()))
    }

    /// Type held by the expression at `span` inside `method`, across all paths.
    pub fn type_at(&mut self, method: MethodId, span: SourceSpan) -> Option<Type> {
        self.resolve_method(method).type_at(span)
    }

    pub fn resolve_instructions(
        &mut self,
        instructions: Rc<InstructionSet>,
        scope: RootScope,
    ) -> Resolution {
        let mut arena = BranchArena::new();
        let root = arena.root(scope);
        match scope.method {
            Some(method) => {
                let symbols = self.symbols;
                self.bind_parameters(&mut arena, root, symbols.method(method), None, &[]);
            }
            None => {
                if let Some(owner) = scope.owner {
                    let receiver = Value::of_type(self.symbols.instance_type(owner));
                    arena.bind_variable(root, "self", Rc::new(receiver));
                }
            }
        }
        let terminals = self.resolve(&mut arena, &instructions, root, 0);
        Resolution {
            arena,
            terminals,
            instructions,
        }
    }

    pub fn resolve_type_of_expression(&mut self, expression: &Expression, scope: RootScope) -> Type {
        match lower_expression(expression) {
            Ok(set) => self.resolve_instructions(Rc::new(set), scope).return_type(),
            Err(error) => {
                self.report_lowering_error(&error);
                Type::Any
            }
        }
    }

    /// Every terminal branch reachable from `start` in `branch`.
    pub fn resolve(
        &mut self,
        arena: &mut BranchArena,
        instructions: &Rc<InstructionSet>,
        branch: BranchId,
        start: usize,
    ) -> Vec<BranchId> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.walk(arena, instructions, branch, start)
        })
    }

    fn walk(
        &mut self,
        arena: &mut BranchArena,
        instructions: &Rc<InstructionSet>,
        branch: BranchId,
        start: usize,
    ) -> Vec<BranchId> {
        let mut index = start;
        loop {
            let Some(instruction) = instructions.get(index) else {
                let value = arena
                    .get(branch)
                    .top_of_stack()
                    .unwrap_or_else(|| Rc::new(Value::nil()));
                trace!(target: "quill::interpreter", branch = branch.0, "fell off the end");
                arena.finalize(branch, Termination::FallThrough, value);
                return vec![branch];
            };
            let span = instructions.span_at(index);

            if !arena.visit(branch, index) {
                self.report_loop_cutoff(arena, branch, index, span);
                arena.finalize(branch, Termination::LoopCutoff, Rc::new(Value::any()));
                return vec![branch];
            }
            trace!(target: "quill::interpreter", branch = branch.0, index, %instruction, "execute");

            match instruction {
                Instruction::Constant { result, literal } => {
                    arena.bind_slot(branch, *result, Rc::new(Value::from_constant(literal.clone())));
                }
                Instruction::Unary {
                    result,
                    operator,
                    operand,
                } => {
                    let operand = self.operand(arena, branch, *operand, span);
                    arena.bind_slot(branch, *result, Rc::new(apply_unary(*operator, &operand)));
                }
                Instruction::Binary {
                    result,
                    left,
                    operator,
                    right,
                } => {
                    let left = self.operand(arena, branch, *left, span);
                    let right = self.operand(arena, branch, *right, span);
                    let value = apply_binary(*operator, &left, &right).unwrap_or_else(|| {
                        trace!(
                            target: "quill::interpreter",
                            left = %left.ty,
                            %operator,
                            right = %right.ty,
                            "no operator rule, result is Any"
                        );
                        Value::any()
                    });
                    arena.bind_slot(branch, *result, Rc::new(value));
                }
                Instruction::Goto { target } => {
                    index = *target;
                    continue;
                }
                Instruction::GotoIf {
                    target, condition, ..
                } => {
                    self.operand(arena, branch, *condition, span);
                    return self.fork(arena, instructions, branch, *target, index + 1);
                }
                Instruction::Call {
                    result,
                    callee,
                    arguments,
                } => {
                    let callee = self.operand(arena, branch, *callee, span);
                    let arguments: Vec<Rc<Value>> = arguments
                        .iter()
                        .map(|slot| self.operand(arena, branch, *slot, span))
                        .collect();
                    let mut returns = self.call(&callee, &arguments, span);

                    if returns.len() > 1 && arena.len() + returns.len() > self.options.max_branches {
                        debug!(
                            target: "quill::interpreter",
                            branch = branch.0,
                            "branch budget exhausted, merging call results"
                        );
                        let merged = Type::union(returns.iter().map(|value| value.ty.clone()));
                        returns = vec![Rc::new(Value::of_type(merged))];
                    }

                    match returns.len() {
                        0 => arena.bind_slot(branch, *result, Rc::new(Value::any())),
                        1 => {
                            let value = returns.remove(0);
                            arena.bind_slot(branch, *result, value);
                        }
                        count => {
                            debug!(
                                target: "quill::interpreter",
                                branch = branch.0,
                                index,
                                count,
                                "forking on call results"
                            );
                            let mut terminals = Vec::new();
                            for value in returns {
                                let child = arena.create_child(branch);
                                arena.bind_slot(child, *result, value);
                                terminals.extend(self.resolve(arena, instructions, child, index + 1));
                            }
                            return terminals;
                        }
                    }
                }
                Instruction::LoadIdentifier { result, name } => {
                    let value = self.resolve_identifier(arena, branch, name, span);
                    arena.bind_slot(branch, *result, value);
                }
                Instruction::LoadMember {
                    result,
                    target,
                    name,
                } => {
                    let value = self.load_member(arena, branch, *target, name, span);
                    arena.bind_slot(branch, *result, value);
                }
                Instruction::Indexer {
                    result,
                    target,
                    index: key,
                } => {
                    let value = self.index(arena, branch, *target, *key, span);
                    arena.bind_slot(branch, *result, value);
                }
                Instruction::Store { name, value } => {
                    let value = self.operand(arena, branch, *value, span);
                    arena.bind_variable(branch, name.clone(), value);
                }
                Instruction::Return { value } => {
                    let returned = match value {
                        Some(slot) => self.operand(arena, branch, *slot, span),
                        None => arena
                            .get(branch)
                            .top_of_stack()
                            .unwrap_or_else(|| Rc::new(Value::nil())),
                    };
                    arena.finalize(branch, Termination::Return, returned);
                    return vec![branch];
                }
            }

            index += 1;
        }
    }

    fn fork(
        &mut self,
        arena: &mut BranchArena,
        instructions: &Rc<InstructionSet>,
        branch: BranchId,
        target: usize,
        fall_through: usize,
    ) -> Vec<BranchId> {
        if arena.len() >= self.options.max_branches {
            debug!(
                target: "quill::interpreter",
                branch = branch.0,
                "branch budget exhausted, following fall-through only"
            );
            return self.resolve(arena, instructions, branch, fall_through);
        }

        match self.options.fork_mode {
            ForkMode::Symmetric => {
                let fall_child = arena.create_child(branch);
                let taken_child = arena.create_child(branch);
                debug!(
                    target: "quill::interpreter",
                    parent = branch.0,
                    fall_through = fall_child.0,
                    taken = taken_child.0,
                    "fork"
                );
                let mut terminals = self.resolve(arena, instructions, fall_child, fall_through);
                terminals.extend(self.resolve(arena, instructions, taken_child, target));
                terminals
            }
            ForkMode::FallthroughOnly => {
                let child = arena.create_child(branch);
                self.resolve(arena, instructions, child, fall_through)
            }
        }
    }

    fn operand(
        &mut self,
        arena: &BranchArena,
        branch: BranchId,
        slot: Slot,
        span: SourceSpan,
    ) -> Rc<Value> {
        match arena.lookup_slot(branch, slot) {
            Some(value) => value,
            None => {
                self.report(
                    AnalysisError::InvalidOperandShape {
                        message: format!("operand {slot} has no value on this path"),
                    },
                    span,
                );
                Rc::new(Value::any())
            }
        }
    }

    /// Local bindings, then the receiver's class members, then module members, then builtins.
    fn resolve_identifier(
        &mut self,
        arena: &BranchArena,
        branch: BranchId,
        name: &str,
        span: SourceSpan,
    ) -> Rc<Value> {
        if let Some(value) = arena.lookup_variable(branch, name) {
            return value;
        }

        let scope = arena.root_scope(branch);
        if let Some(owner) = scope.owner {
            let members = self.symbols.class_members(owner, name);
            if !members.is_empty() {
                let receiver = arena
                    .lookup_variable(branch, "self")
                    .map(|receiver| Rc::downgrade(&receiver));
                return Rc::new(self.member_value(members, receiver));
            }
        }

        let members = self.symbols.get_members(name);
        if !members.is_empty() {
            return Rc::new(self.member_value(members, None));
        }

        if let Some(builtin) = Builtin::lookup(name) {
            return Rc::new(Value::from_members(
                None,
                vec![MemberRef::Builtin(builtin)],
                self.symbols,
            ));
        }

        self.report(
            AnalysisError::UnresolvedIdentifier {
                name: name.to_string(),
            },
            span,
        );
        Rc::new(Value::any())
    }

    /// Value denoted by a non-empty member list; callables keep every overload.
    fn member_value(&self, members: Vec<MemberRef>, receiver: Option<Weak<Value>>) -> Value {
        let first = members[0];
        match first {
            MemberRef::Field { class, index } => {
                Value::of_type(self.symbols.field(class, index).ty.clone())
            }
            MemberRef::Global(id) => {
                let global = self.symbols.global(id);
                match (&global.constant, global.is_const) {
                    (Some(literal), true) => Value::from_constant(literal.clone()),
                    _ => Value::of_type(global.ty.clone()),
                }
            }
            MemberRef::Class(_) => Value::from_members(None, vec![first], self.symbols),
            MemberRef::Method(_) | MemberRef::Builtin(_) => {
                let callables = members
                    .into_iter()
                    .filter(|member| matches!(member, MemberRef::Method(_) | MemberRef::Builtin(_)))
                    .collect();
                Value::from_members(receiver, callables, self.symbols)
            }
        }
    }

    fn load_member(
        &mut self,
        arena: &mut BranchArena,
        branch: BranchId,
        target_slot: Slot,
        name: &str,
        span: SourceSpan,
    ) -> Rc<Value> {
        let target = self.operand(arena, branch, target_slot, span);
        if let Some(cached) = target.properties.get(name) {
            return cached.clone();
        }

        let Some(member) = self.lookup_member(&target, name) else {
            self.report(
                AnalysisError::UnresolvedMember {
                    ty: target.ty.describe(),
                    name: name.to_string(),
                },
                span,
            );
            return Rc::new(Value::any());
        };
        let member = Rc::new(member);

        // memoize on this branch's own copy of the target
        let mut memoized = target.copy();
        memoized
            .properties
            .insert(name.to_string(), member.clone());
        arena.rebind_slot(branch, target_slot, Rc::new(memoized));
        member
    }

    fn lookup_member(&self, target: &Rc<Value>, name: &str) -> Option<Value> {
        match &target.ty {
            Type::Instance(class) | Type::Class(class) => {
                let members = self.symbols.class_members(class.id, name);
                if members.is_empty() {
                    None
                } else {
                    Some(self.member_value(members, Some(Rc::downgrade(target))))
                }
            }
            Type::String if name == "length" => Some(match target.string() {
                Some(text) => Value::from_constant(Literal::Number(text.chars().count() as f64)),
                None => Value::bounded_number(Some(0.0), None),
            }),
            Type::Number if name == MIN_PROPERTY || name == MAX_PROPERTY => {
                Some(Value::of_type(Type::Number))
            }
            Type::Any => Some(Value::any()),
            Type::Union(arms) => {
                let found: Vec<Value> = arms
                    .iter()
                    .filter_map(|arm| self.lookup_member(&Rc::new(Value::of_type(arm.clone())), name))
                    .collect();
                match found.len() {
                    0 => None,
                    1 => found.into_iter().next(),
                    _ => Some(Value::of_type(Type::union(
                        found.into_iter().map(|value| value.ty),
                    ))),
                }
            }
            _ => None,
        }
    }

    fn index(
        &mut self,
        arena: &BranchArena,
        branch: BranchId,
        target_slot: Slot,
        index_slot: Slot,
        span: SourceSpan,
    ) -> Rc<Value> {
        let target = self.operand(arena, branch, target_slot, span);
        let index = self.operand(arena, branch, index_slot, span);

        let value = match (&target.ty, &index.ty) {
            (Type::Any, _) => Value::any(),
            (Type::String, Type::Number) => match (target.string(), index.number()) {
                (Some(text), Some(position)) if position >= 0.0 && position.fract() == 0.0 => {
                    match text.chars().nth(position as usize) {
                        Some(character) => Value::from_constant(Literal::String(character.to_string())),
                        None => Value::of_type(Type::String),
                    }
                }
                _ => Value::of_type(Type::String),
            },
            (Type::String, Type::Any) => Value::of_type(Type::String),
            (Type::Instance(_) | Type::Class(_), _) => match index.string() {
                Some(key) => match self.lookup_member(&target, key) {
                    Some(member) => member,
                    None => {
                        self.report(
                            AnalysisError::UnresolvedMember {
                                ty: target.ty.describe(),
                                name: key.to_string(),
                            },
                            span,
                        );
                        Value::any()
                    }
                },
                None if matches!(index.ty, Type::String | Type::Any) => Value::any(),
                None => {
                    self.report_unindexable(&target, &index, span);
                    Value::any()
                }
            },
            _ => {
                self.report_unindexable(&target, &index, span);
                Value::any()
            }
        };
        Rc::new(value)
    }

    fn report_unindexable(&mut self, target: &Value, index: &Value, span: SourceSpan) {
        self.report(
            AnalysisError::InvalidOperandShape {
                message: format!(
                    "cannot index a value of type {} with {}",
                    target.ty.describe(),
                    index.ty.describe()
                ),
            },
            span,
        );
    }

    /// Possible results of calling `callee`, one per distinct callee return.
    fn call(&mut self, callee: &Rc<Value>, arguments: &[Rc<Value>], span: SourceSpan) -> Vec<Rc<Value>> {
        let any = || vec![Rc::new(Value::any())];

        if let Some(members) = &callee.members {
            if let Some(MemberRef::Class(class)) = members.first() {
                return vec![self.construct(*class, arguments, span)];
            }
            let argument_types: Vec<Type> = arguments.iter().map(|value| value.ty.clone()).collect();
            let Some(choice) = resolve_overload(self.symbols, members, &argument_types) else {
                return any();
            };
            if !choice.matched {
                self.report_no_overload(self.symbols.member_name(choice.member), &argument_types, span);
            }
            return match choice.member {
                MemberRef::Method(method) => {
                    let receiver = callee.target.as_ref().and_then(Weak::upgrade);
                    self.invoke(method, receiver, arguments, span)
                }
                MemberRef::Builtin(builtin) => vec![Rc::new(Value::of_type(builtin.return_type()))],
                _ => any(),
            };
        }

        match callee.ty {
            Type::Any | Type::Function => any(),
            _ => {
                self.report(
                    AnalysisError::InvalidOperandShape {
                        message: format!("value of type {} is not callable", callee.ty.describe()),
                    },
                    span,
                );
                any()
            }
        }
    }

    fn construct(&mut self, class: ClassId, arguments: &[Rc<Value>], span: SourceSpan) -> Rc<Value> {
        let symbols = self.symbols;
        let info = symbols.class(class);
        let argument_types: Vec<Type> = arguments.iter().map(|value| value.ty.clone()).collect();
        let initializers: Vec<MemberRef> = symbols
            .class_members(class, "init")
            .into_iter()
            .filter(|member| matches!(member, MemberRef::Method(_)))
            .collect();

        if initializers.is_empty() {
            if !arguments.is_empty() && arguments.len() != info.fields.len() {
                self.report_no_overload(info.name.clone(), &argument_types, span);
            }
        } else if let Some(choice) = resolve_overload(symbols, &initializers, &argument_types) {
            if !choice.matched {
                self.report_no_overload(symbols.member_name(choice.member), &argument_types, span);
            }
        }

        Rc::new(Value::of_type(symbols.instance_type(class)))
    }

    /// Resolves the body of `method` for these arguments and returns its distinct results.
    fn invoke(
        &mut self,
        method: MethodId,
        receiver: Option<Rc<Value>>,
        arguments: &[Rc<Value>],
        span: SourceSpan,
    ) -> Vec<Rc<Value>> {
        let symbols = self.symbols;
        let declaration = symbols.method(method);
        let declared = declaration.return_type.clone();
        let key = CallKey {
            method,
            receiver: declaration.owner.map(|owner| {
                receiver
                    .as_ref()
                    .map(|value| value.ty.clone())
                    .unwrap_or_else(|| symbols.instance_type(owner))
            }),
            arguments: arguments.iter().map(|value| value.ty.clone()).collect(),
        };

        let memo_key = MemoKey {
            call: key.clone(),
            receiver: receiver.as_deref().map(ValueKey::of),
            arguments: arguments.iter().map(|value| ValueKey::of(value)).collect(),
        };
        if let Some(memoized) = self.return_memo.get(&memo_key) {
            return memoized.clone();
        }

        let fallback = || vec![Rc::new(Value::of_type(declared.clone().unwrap_or(Type::Any)))];
        if self.call_stack.contains(&key) || self.call_stack.len() >= self.options.max_call_depth {
            debug!(
                target: "quill::interpreter",
                method = %symbols.qualified_name(method),
                depth = self.call_stack.len(),
                "recursion cutoff"
            );
            self.cutoffs += 1;
            self.report(
                AnalysisError::RecursionCutoff {
                    method: symbols.qualified_name(method),
                },
                span,
            );
            return fallback();
        }

        let Some(instructions) = self.instructions(method) else {
            return fallback();
        };

        let mut arena = BranchArena::new();
        let root = arena.root(RootScope {
            method: Some(method),
            owner: declaration.owner,
        });
        self.bind_parameters(&mut arena, root, declaration, receiver, arguments);

        let cutoffs = self.cutoffs;
        self.call_stack.push(key);
        let terminals = self.resolve(&mut arena, &instructions, root, 0);
        self.call_stack.pop();

        let resolution = Resolution {
            arena,
            terminals,
            instructions,
        };
        let values = dedupe(coerce_returns(resolution.return_values(), declared.as_ref()));
        let values = if values.is_empty() { fallback() } else { values };
        if self.cutoffs == cutoffs {
            self.return_memo.insert(memo_key, values.clone());
        }
        values
    }

    /// Binds parameters and `self` in the root branch. Arguments keep their constants
    /// when they fit the declared type; otherwise the declared type stands in.
    fn bind_parameters(
        &self,
        arena: &mut BranchArena,
        root: BranchId,
        method: &MethodDecl,
        receiver: Option<Rc<Value>>,
        arguments: &[Rc<Value>],
    ) -> Option<Rc<Value>> {
        for (position, param) in method.params.iter().enumerate() {
            let value = if param.is_variadic {
                Value::any()
            } else if let Some(argument) = arguments.get(position) {
                if argument.ty.is_assignable_to(&param.ty) {
                    argument.copy()
                } else {
                    Value::of_type(param.ty.clone())
                }
            } else {
                match &param.default {
                    Some(ParamDefault::Literal(literal))
                        if literal_type(literal).is_assignable_to(&param.ty) =>
                    {
                        Value::from_constant(literal.clone())
                    }
                    _ => Value::of_type(param.ty.clone()),
                }
            };
            arena.bind_variable(root, param.name.clone(), Rc::new(value));
        }

        let owner = method.owner?;
        let receiver =
            receiver.unwrap_or_else(|| Rc::new(Value::of_type(self.symbols.instance_type(owner))));
        arena.bind_variable(root, "self", receiver.clone());
        Some(receiver)
    }

    fn report(&mut self, error: AnalysisError, span: SourceSpan) {
        let span = (span.line != 0).then_some(span);
        self.diagnostics
            .report(error.kind(), error.level(), error.to_string(), span);
    }

    fn report_no_overload(&mut self, name: String, arguments: &[Type], span: SourceSpan) {
        let arguments = arguments
            .iter()
            .map(Type::describe)
            .collect::<Vec<_>>()
            .join(", ");
        self.report(AnalysisError::NoMatchingOverload { name, arguments }, span);
    }

    fn report_loop_cutoff(&mut self, arena: &BranchArena, branch: BranchId, index: usize, span: SourceSpan) {
        let method = arena
            .root_scope(branch)
            .method
            .map(|method| self.symbols.qualified_name(method))
            .unwrap_or_else(|| "<expression>".to_string());
        debug!(
            target: "quill::interpreter",
            branch = branch.0,
            index,
            %method,
            "loop cutoff"
        );
        self.report(AnalysisError::LoopCutoff { method }, span);
    }

    fn report_lowering_error(&mut self, error: &LoweringError) {
        self.diagnostics.report(
            DiagnosticKind::Lowering,
            DiagnosticLevel::Error,
            error.to_string(),
            error.span(),
        );
    }
}

/// Applies a declared return type: values of that type keep their constants,
/// anything else is replaced by the declared type.
fn coerce_returns(values: Vec<Rc<Value>>, declared: Option<&Type>) -> Vec<Rc<Value>> {
    let Some(declared) = declared else {
        return values;
    };
    values
        .into_iter()
        .map(|value| {
            if value.ty.is_assignable_to(declared) {
                value
            } else {
                Rc::new(Value::of_type(declared.clone()))
            }
        })
        .collect()
}

fn dedupe(values: Vec<Rc<Value>>) -> Vec<Rc<Value>> {
    let mut distinct: Vec<Rc<Value>> = Vec::new();
    for value in values {
        let seen = distinct
            .iter()
            .any(|existing| existing.ty == value.ty && existing.constant == value.constant);
        if !seen {
            distinct.push(value);
        }
    }
    distinct
}
