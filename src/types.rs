//! The `Type` sum and the operations defined on it: structural equality, the
//! C-ABI size/alignment model, the numeric precision lattice, promotion, and
//! the "completeness" machinery that resolves `none` literals from context.

use std::cell::RefCell;
use std::fmt::{self, Display};
use std::rc::Rc;

use crate::ast::AstNode;
use crate::environment::Env;

/// Maximum size (in bytes) of a list/set element. Larger payloads must go
/// behind a pointer.
pub const LIST_MAX_STRIDE: u64 = 64 * 1024;

/// A function/constructor argument specification.
#[derive(Debug, Clone)]
pub struct Arg {
    pub name: String,
    /// `None` only while a signature is being inferred from a default value.
    pub ty: Option<Type>,
    pub default_val: Option<Rc<AstNode>>,
}

impl Arg {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Arg { name: name.into(), ty: Some(ty), default_val: None }
    }

    pub fn with_default(name: impl Into<String>, ty: Type, default_val: Rc<AstNode>) -> Self {
        Arg { name: name.into(), ty: Some(ty), default_val: Some(default_val) }
    }
}

#[derive(Debug)]
pub struct FunctionInfo {
    pub args: Vec<Arg>,
    pub ret: Type,
}

#[derive(Debug)]
pub struct TextInfo {
    /// `"Text"` for the base text type; otherwise the lang name (`Path`,
    /// user-defined DSLs).
    pub lang: String,
    pub env: Env,
}

#[derive(Debug)]
pub struct StructInfo {
    pub name: String,
    pub fields: Vec<Arg>,
    pub env: Env,
    /// Still a forward-declared placeholder (fields unknown).
    pub opaque: bool,
    /// Defined in C, not by this compiler.
    pub external: bool,
    /// Contents hidden from stringification.
    pub secret: bool,
}

#[derive(Debug)]
pub struct EnumInfo {
    pub name: String,
    pub tags: Vec<Tag>,
    pub env: Env,
    pub opaque: bool,
}

#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub tag_value: i64,
    /// Always a `Type::Struct`; empty field list for payload-less tags.
    pub payload: Type,
}

#[derive(Debug)]
pub struct TableInfo {
    pub key: Option<Type>,
    pub value: Option<Type>,
    pub default_value: Option<Rc<AstNode>>,
    pub env: Env,
}

#[derive(Debug)]
pub struct TypeInfoInfo {
    pub name: String,
    pub ty: Type,
    pub env: Env,
}

/// Every type a Tomo value can have. Nominal types (`Struct`, `Enum`,
/// lang-tagged `Text`) are shared `Rc`s so the prebind pass can install
/// opaque placeholders that the bind pass later fills in.
#[derive(Debug, Clone)]
pub enum Type {
    Void,
    Abort,
    Return(Box<Type>),
    Memory,
    Bool,
    Byte,
    CString,
    BigInt,
    Int { bits: u8 },
    Num { bits: u8 },
    Text(Rc<TextInfo>),
    List { item: Option<Box<Type>> },
    Set { item: Option<Box<Type>> },
    Table(Rc<TableInfo>),
    Pointer { pointed: Box<Type>, is_stack: bool },
    Optional(Option<Box<Type>>),
    Struct(Rc<RefCell<StructInfo>>),
    Enum(Rc<RefCell<EnumInfo>>),
    Function(Rc<FunctionInfo>),
    Closure(Rc<FunctionInfo>),
    TypeInfo(Rc<TypeInfoInfo>),
    Module { name: String },
}

/// Partial order on numeric precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Less,
    Equal,
    More,
    Incomparable,
}

impl Type {
    pub fn int(bits: u8) -> Type {
        Type::Int { bits }
    }

    pub fn num(bits: u8) -> Type {
        Type::Num { bits }
    }

    pub fn optional(inner: Type) -> Type {
        Type::Optional(Some(Box::new(inner)))
    }

    pub fn list_of(item: Type) -> Type {
        Type::List { item: Some(Box::new(item)) }
    }

    pub fn set_of(item: Type) -> Type {
        Type::Set { item: Some(Box::new(item)) }
    }

    pub fn pointer_to(pointed: Type, is_stack: bool) -> Type {
        Type::Pointer { pointed: Box::new(pointed), is_stack }
    }

    pub fn function(args: Vec<Arg>, ret: Type) -> Type {
        Type::Function(Rc::new(FunctionInfo { args, ret }))
    }

    pub fn closure(args: Vec<Arg>, ret: Type) -> Type {
        Type::Closure(Rc::new(FunctionInfo { args, ret }))
    }

    /// The function signature behind either a `Function` or a `Closure`.
    pub fn fn_info(&self) -> Option<&Rc<FunctionInfo>> {
        match self {
            Type::Function(info) | Type::Closure(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_void_like(&self) -> bool {
        matches!(self, Type::Void | Type::Abort | Type::Return(_))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Type::Optional(_))
    }
}

/// Structural equality modulo environment pointers: nominal types compare by
/// name, everything else recursively.
pub fn type_eq(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Void, Type::Void)
        | (Type::Abort, Type::Abort)
        | (Type::Memory, Type::Memory)
        | (Type::Bool, Type::Bool)
        | (Type::Byte, Type::Byte)
        | (Type::CString, Type::CString)
        | (Type::BigInt, Type::BigInt) => true,
        (Type::Return(x), Type::Return(y)) => type_eq(x, y),
        (Type::Int { bits: x }, Type::Int { bits: y }) => x == y,
        (Type::Num { bits: x }, Type::Num { bits: y }) => x == y,
        (Type::Text(x), Type::Text(y)) => x.lang == y.lang,
        (Type::List { item: x }, Type::List { item: y })
        | (Type::Set { item: x }, Type::Set { item: y }) => opt_type_eq(x.as_deref(), y.as_deref()),
        (Type::Table(x), Type::Table(y)) => {
            opt_type_eq(x.key.as_ref(), y.key.as_ref())
                && opt_type_eq(x.value.as_ref(), y.value.as_ref())
        }
        (
            Type::Pointer { pointed: x, is_stack: xs },
            Type::Pointer { pointed: y, is_stack: ys },
        ) => xs == ys && type_eq(x, y),
        (Type::Optional(x), Type::Optional(y)) => opt_type_eq(x.as_deref(), y.as_deref()),
        (Type::Struct(x), Type::Struct(y)) => x.borrow().name == y.borrow().name,
        (Type::Enum(x), Type::Enum(y)) => x.borrow().name == y.borrow().name,
        (Type::Function(x), Type::Function(y)) | (Type::Closure(x), Type::Closure(y)) => {
            fn_eq(x, y)
        }
        (Type::TypeInfo(x), Type::TypeInfo(y)) => x.name == y.name,
        (Type::Module { name: x }, Type::Module { name: y }) => x == y,
        _ => false,
    }
}

fn opt_type_eq(a: Option<&Type>, b: Option<&Type>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => type_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn fn_eq(a: &FunctionInfo, b: &FunctionInfo) -> bool {
    a.args.len() == b.args.len()
        && type_eq(&a.ret, &b.ret)
        && a.args.iter().zip(&b.args).all(|(x, y)| opt_type_eq(x.ty.as_ref(), y.ty.as_ref()))
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        type_eq(self, other)
    }
}

impl Eq for Type {}

/// Size in bytes of this type's C representation.
pub fn type_size(t: &Type) -> u64 {
    match t {
        Type::Void | Type::Abort | Type::Return(_) | Type::Memory | Type::Module { .. } => 0,
        Type::Bool | Type::Byte => 1,
        Type::CString | Type::Pointer { .. } | Type::Function(_) | Type::TypeInfo(_) => 8,
        Type::BigInt => 8,
        Type::Int { bits } => u64::from(*bits) / 8,
        Type::Num { bits } => u64::from(*bits) / 8,
        Type::Text(_) => 32,
        Type::List { .. } => 24,
        Type::Set { .. } | Type::Table(_) => 40,
        Type::Closure(_) => 16,
        Type::Optional(inner) => match inner.as_deref() {
            Some(inner) if optional_has_flag_field(inner) => {
                let size = type_size(inner);
                let align = type_align(inner);
                align_to(size + 1, align)
            }
            Some(inner) => type_size(inner),
            None => 0,
        },
        Type::Struct(info) => {
            let info = info.borrow();
            let mut size = 0u64;
            let mut max_align = 1u64;
            for field in &info.fields {
                let Some(field_t) = &field.ty else { continue };
                let falign = type_align(field_t);
                max_align = max_align.max(falign);
                size = align_to(size, falign) + type_size(field_t);
            }
            align_to(size, max_align)
        }
        Type::Enum(info) => {
            let info = info.borrow();
            if !enum_info_has_fields(&info) {
                return 4;
            }
            let mut payload_size = 0u64;
            let mut payload_align = 4u64;
            for tag in &info.tags {
                payload_size = payload_size.max(type_size(&tag.payload));
                payload_align = payload_align.max(type_align(&tag.payload));
            }
            align_to(align_to(4, payload_align) + payload_size, payload_align)
        }
    }
}

/// Alignment in bytes of this type's C representation.
pub fn type_align(t: &Type) -> u64 {
    match t {
        Type::Void | Type::Abort | Type::Return(_) | Type::Memory | Type::Module { .. } => 1,
        Type::Bool | Type::Byte => 1,
        Type::CString
        | Type::Pointer { .. }
        | Type::Function(_)
        | Type::TypeInfo(_)
        | Type::BigInt
        | Type::Text(_)
        | Type::List { .. }
        | Type::Set { .. }
        | Type::Table(_)
        | Type::Closure(_) => 8,
        Type::Int { bits } | Type::Num { bits } => u64::from(*bits) / 8,
        Type::Optional(inner) => inner.as_deref().map(type_align).unwrap_or(1),
        Type::Struct(info) => {
            let info = info.borrow();
            info.fields
                .iter()
                .filter_map(|f| f.ty.as_ref())
                .map(type_align)
                .max()
                .unwrap_or(1)
        }
        Type::Enum(info) => {
            let info = info.borrow();
            if !enum_info_has_fields(&info) {
                return 4;
            }
            info.tags.iter().map(|tag| type_align(&tag.payload)).max().unwrap_or(4).max(4)
        }
    }
}

/// Size of a struct up to (but not including) its trailing padding. Used by
/// the `DEFINE_OPTIONAL_TYPE` emission so the `has_value` flag can reuse
/// padding bytes.
pub fn unpadded_struct_size(t: &Type) -> u64 {
    let Type::Struct(info) = t else { return type_size(t) };
    let info = info.borrow();
    let mut size = 0u64;
    for field in &info.fields {
        let Some(field_t) = &field.ty else { continue };
        size = align_to(size, type_align(field_t)) + type_size(field_t);
    }
    size
}

fn align_to(size: u64, align: u64) -> u64 {
    if align <= 1 { size } else { size.div_ceil(align) * align }
}

/// Whether `Optional(t)` needs a separate `has_value` flag, as opposed to
/// reusing an in-band representation (null pointer, NaN, zero tag, ...).
fn optional_has_flag_field(t: &Type) -> bool {
    matches!(t, Type::Int { .. } | Type::Byte | Type::Struct(_))
}

/// Strip one layer of `Pointer`.
pub fn value_type(t: &Type) -> Type {
    let mut t = t.clone();
    while let Type::Pointer { pointed, .. } = t {
        t = *pointed;
    }
    t
}

/// Strip `Optional` if present.
pub fn non_optional(t: &Type) -> Type {
    match t {
        Type::Optional(Some(inner)) => (**inner).clone(),
        _ => t.clone(),
    }
}

pub fn is_int_type(t: &Type) -> bool {
    matches!(t, Type::Int { .. } | Type::BigInt | Type::Byte)
}

pub fn is_numeric_type(t: &Type) -> bool {
    matches!(t, Type::Int { .. } | Type::BigInt | Type::Byte | Type::Num { .. })
}

/// A type is incomplete when a `none` or empty-collection literal left a
/// hole in it that context must fill.
pub fn is_incomplete_type(t: &Type) -> bool {
    match t {
        Type::Optional(inner) => inner.as_deref().map(is_incomplete_type).unwrap_or(true),
        Type::List { item } | Type::Set { item } => {
            item.as_deref().map(is_incomplete_type).unwrap_or(true)
        }
        Type::Table(info) => {
            info.key.as_ref().map(is_incomplete_type).unwrap_or(true)
                || info.value.as_ref().map(is_incomplete_type).unwrap_or(true)
        }
        Type::Pointer { pointed, .. } => is_incomplete_type(pointed),
        Type::Return(inner) => is_incomplete_type(inner),
        Type::Function(info) | Type::Closure(info) => {
            is_incomplete_type(&info.ret)
                || info.args.iter().any(|a| a.ty.as_ref().map(is_incomplete_type).unwrap_or(true))
        }
        _ => false,
    }
}

/// Unify two types where either may be incomplete, preferring the more
/// complete side at each hole. `None` when the shapes don't match.
pub fn most_complete_type(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        (Type::Optional(x), Type::Optional(y)) => {
            Some(Type::Optional(merge_holes(x.as_deref(), y.as_deref())?))
        }
        (Type::List { item: x }, Type::List { item: y }) => {
            Some(Type::List { item: merge_holes(x.as_deref(), y.as_deref())? })
        }
        (Type::Set { item: x }, Type::Set { item: y }) => {
            Some(Type::Set { item: merge_holes(x.as_deref(), y.as_deref())? })
        }
        (Type::Table(x), Type::Table(y)) => {
            let key = merge_opt(x.key.as_ref(), y.key.as_ref())?;
            let value = merge_opt(x.value.as_ref(), y.value.as_ref())?;
            Some(Type::Table(Rc::new(TableInfo {
                key,
                value,
                default_value: x.default_value.clone().or_else(|| y.default_value.clone()),
                env: x.env.clone(),
            })))
        }
        (
            Type::Pointer { pointed: x, is_stack: xs },
            Type::Pointer { pointed: y, is_stack: ys },
        ) if xs == ys => {
            Some(Type::pointer_to(most_complete_type(x, y)?, *xs))
        }
        _ => {
            if type_eq(a, b) {
                Some(a.clone())
            } else {
                None
            }
        }
    }
}

fn merge_holes(a: Option<&Type>, b: Option<&Type>) -> Option<Option<Box<Type>>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Some(Box::new(most_complete_type(a, b)?))),
        (Some(t), None) | (None, Some(t)) => Some(Some(Box::new(t.clone()))),
        (None, None) => Some(None),
    }
}

fn merge_opt(a: Option<&Type>, b: Option<&Type>) -> Option<Option<Type>> {
    merge_holes(a, b).map(|boxed| boxed.map(|b| *b))
}

/// Least common supertype under the promotion lattice; `None` when the two
/// sides are incompatible. `Abort`/`Return` branches unify with anything.
pub fn type_or_type(a: Option<&Type>, b: Option<&Type>) -> Option<Type> {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        (Some(t), None) | (None, Some(t)) => return Some(t.clone()),
        (None, None) => return None,
    };
    match (a, b) {
        (Type::Return(x), Type::Return(y)) => {
            Some(Type::Return(Box::new(type_or_type(Some(x), Some(y))?)))
        }
        (Type::Abort | Type::Return(_), other) => Some(other.clone()),
        (other, Type::Abort | Type::Return(_)) => Some(other.clone()),
        _ => {
            if let Some(merged) = most_complete_type(a, b) {
                return Some(merged);
            }
            if can_promote(a, b) {
                Some(b.clone())
            } else if can_promote(b, a) {
                Some(a.clone())
            } else {
                None
            }
        }
    }
}

/// Compare the numeric precision of two types.
pub fn compare_precision(a: &Type, b: &Type) -> Precision {
    fn int_width(t: &Type) -> Option<u32> {
        match t {
            Type::Byte => Some(8),
            Type::Int { bits } => Some(u32::from(*bits)),
            Type::BigInt => Some(u32::MAX),
            _ => None,
        }
    }
    fn num_width(t: &Type) -> Option<u32> {
        match t {
            Type::Num { bits } => Some(u32::from(*bits)),
            _ => None,
        }
    }
    // Byte arithmetic only mixes with Byte; Int/BigInt only with Int/BigInt.
    if matches!(a, Type::Byte) != matches!(b, Type::Byte) {
        return Precision::Incomparable;
    }
    match (int_width(a), int_width(b), num_width(a), num_width(b)) {
        (Some(x), Some(y), _, _) | (_, _, Some(x), Some(y)) => {
            if x < y {
                Precision::Less
            } else if x > y {
                Precision::More
            } else {
                Precision::Equal
            }
        }
        _ => Precision::Incomparable,
    }
}

/// The mantissa width (in bits) a float type can represent exactly.
fn float_mantissa_bits(bits: u8) -> u8 {
    if bits == 32 { 24 } else { 53 }
}

/// Whether a value of type `from` can be implicitly promoted to `to`.
/// Demotions and cross-kind conversions that can lose information always
/// require an explicit constructor.
pub fn can_promote(from: &Type, to: &Type) -> bool {
    if type_eq(from, to) {
        return true;
    }
    if most_complete_type(from, to).is_some() {
        return true;
    }

    // Serialization: anything goes to/from [Byte].
    let byte_list = Type::list_of(Type::Byte);
    if type_eq(to, &byte_list) || type_eq(from, &byte_list) {
        return true;
    }

    match (from, to) {
        // Function -> Closure wrapping.
        (Type::Function(x), Type::Closure(y)) => fn_eq(x, y),
        // Non-optional -> optional.
        (_, Type::Optional(inner)) => match inner.as_deref() {
            Some(inner) => !from.is_optional() && (type_eq(from, inner) || can_promote(from, inner)),
            None => !from.is_void_like(),
        },
        // Optional -> Bool check.
        (Type::Optional(_), Type::Bool) => true,
        // Lang-tagged text -> plain text, and text -> C string.
        (Type::Text(_), Type::Text(info)) => info.lang == "Text",
        (Type::Text(info), Type::CString) => info.lang == "Text",
        // Automatic dereference.
        (Type::Pointer { pointed, .. }, _) if !matches!(to, Type::Pointer { .. }) => {
            can_promote(pointed, to)
        }
        // Pointer compatibility: stack refs may not masquerade as heap
        // pointers, and `@Memory` erases the pointed type.
        (
            Type::Pointer { pointed: from_p, is_stack: from_stack },
            Type::Pointer { pointed: to_p, is_stack: to_stack },
        ) => {
            (!*from_stack || *to_stack)
                && (type_eq(from_p, to_p) || matches!(**to_p, Type::Memory))
        }
        // Tables with and without default values share a representation.
        (Type::Table(x), Type::Table(y)) => {
            opt_type_eq(x.key.as_ref(), y.key.as_ref())
                && opt_type_eq(x.value.as_ref(), y.value.as_ref())
        }
        // Numeric widening.
        (Type::Bool, t) if is_numeric_type(t) => true,
        (Type::Byte, Type::Int { .. } | Type::BigInt) => true,
        (Type::Int { .. }, Type::BigInt) => true,
        (Type::Int { bits: from_bits }, Type::Int { bits: to_bits }) => from_bits <= to_bits,
        (Type::Int { bits: int_bits }, Type::Num { bits: num_bits }) => {
            *int_bits < float_mantissa_bits(*num_bits)
        }
        (Type::Byte, Type::Num { .. }) => true,
        (Type::Num { bits: from_bits }, Type::Num { bits: to_bits }) => from_bits <= to_bits,
        // A single-payload enum tag can absorb its field type.
        (_, Type::Enum(info)) => enum_single_value_tag(to, from).is_some()
            && !info.borrow().opaque,
        _ => false,
    }
}

/// Whether this type transitively contains any stack reference. Recursion
/// stops at pointers: a heap pointer to stack memory is itself the thing
/// this check exists to forbid.
pub fn has_stack_memory(t: &Type) -> bool {
    match t {
        Type::Pointer { is_stack, .. } => *is_stack,
        Type::Optional(inner) => inner.as_deref().map(has_stack_memory).unwrap_or(false),
        Type::Return(inner) => has_stack_memory(inner),
        Type::Struct(info) => {
            info.borrow().fields.iter().any(|f| f.ty.as_ref().map(has_stack_memory).unwrap_or(false))
        }
        Type::Enum(info) => info.borrow().tags.iter().any(|tag| has_stack_memory(&tag.payload)),
        _ => false,
    }
}

/// Whether this type can reference heap memory, which decides whether a
/// global of this type can be initialized statically.
pub fn has_heap_memory(t: &Type) -> bool {
    match t {
        Type::List { .. }
        | Type::Set { .. }
        | Type::Table(_)
        | Type::BigInt
        | Type::Closure(_) => true,
        Type::Pointer { is_stack, .. } => !*is_stack,
        Type::Optional(inner) => inner.as_deref().map(has_heap_memory).unwrap_or(false),
        Type::Struct(info) => {
            info.borrow().fields.iter().any(|f| f.ty.as_ref().map(has_heap_memory).unwrap_or(false))
        }
        Type::Enum(info) => info.borrow().tags.iter().any(|tag| has_heap_memory(&tag.payload)),
        _ => false,
    }
}

/// Plain-bits types can use the runtime's packed-data metamethods (bitwise
/// equality/hashing) instead of the generic structural ones.
pub fn is_packed_data(t: &Type) -> bool {
    match t {
        Type::Bool | Type::Byte | Type::Int { .. } | Type::Num { .. } => true,
        Type::Struct(info) => info
            .borrow()
            .fields
            .iter()
            .all(|f| f.ty.as_ref().map(is_packed_data).unwrap_or(false)),
        Type::Enum(info) => info.borrow().tags.iter().all(|tag| is_packed_data(&tag.payload)),
        Type::Optional(Some(inner)) => is_packed_data(inner),
        _ => false,
    }
}

/// Look up a field's type on a struct, or a tag on an enum (where a
/// payload-less tag reads as a `Bool` test and a payload tag as an optional
/// payload).
pub fn get_field_type(t: &Type, field: &str) -> Option<Type> {
    match &value_type(&non_optional(t)) {
        Type::Struct(info) => {
            let info = info.borrow();
            info.fields.iter().find(|f| f.name == field).and_then(|f| f.ty.clone())
        }
        Type::Enum(info) => {
            let info = info.borrow();
            let tag = info.tags.iter().find(|tag| tag.name == field)?;
            if enum_tag_has_payload(tag) {
                Some(Type::optional(tag.payload.clone()))
            } else {
                Some(Type::Bool)
            }
        }
        _ => None,
    }
}

fn enum_tag_has_payload(tag: &Tag) -> bool {
    match &tag.payload {
        Type::Struct(info) => !info.borrow().fields.is_empty(),
        _ => false,
    }
}

/// The item type produced by iterating a value of type `t`.
pub fn get_iterated_type(t: &Type) -> Option<Type> {
    match &value_type(t) {
        Type::List { item } | Type::Set { item } => item.as_deref().cloned(),
        Type::Table(info) => info.key.clone(),
        Type::BigInt => Some(Type::BigInt),
        Type::Function(info) | Type::Closure(info) => Some(non_optional(&info.ret)),
        _ => None,
    }
}

/// Whether any tag of this enum carries a payload; decides the emitted C
/// layout (plain `enum` vs tagged struct).
pub fn enum_has_fields(t: &Type) -> bool {
    match t {
        Type::Enum(info) => enum_info_has_fields(&info.borrow()),
        _ => false,
    }
}

fn enum_info_has_fields(info: &EnumInfo) -> bool {
    info.tags.iter().any(enum_tag_has_payload)
}

/// The tag of `enum_t` whose payload is exactly one field of type `t`, if
/// any. Such enums absorb the field type by implicit construction.
pub fn enum_single_value_tag(enum_t: &Type, t: &Type) -> Option<String> {
    let Type::Enum(info) = enum_t else { return None };
    let info = info.borrow();
    for tag in &info.tags {
        let Type::Struct(payload) = &tag.payload else { continue };
        let payload = payload.borrow();
        if payload.fields.len() == 1 {
            if let Some(field_t) = &payload.fields[0].ty {
                if type_eq(field_t, t) {
                    return Some(tag.name.clone());
                }
            }
        }
    }
    None
}

/// The name of a text/struct/enum type (the types conversion constructors
/// can be registered for).
pub fn get_type_name(t: &Type) -> Option<String> {
    match t {
        Type::Text(info) => Some(info.lang.clone()),
        Type::Struct(info) => Some(info.borrow().name.clone()),
        Type::Enum(info) => Some(info.borrow().name.clone()),
        _ => None,
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "Void"),
            Type::Abort => write!(f, "Abort"),
            Type::Return(inner) => write!(f, "Return({inner})"),
            Type::Memory => write!(f, "Memory"),
            Type::Bool => write!(f, "Bool"),
            Type::Byte => write!(f, "Byte"),
            Type::CString => write!(f, "CString"),
            Type::BigInt => write!(f, "Int"),
            Type::Int { bits } => write!(f, "Int{bits}"),
            Type::Num { bits: 64 } => write!(f, "Num"),
            Type::Num { bits } => write!(f, "Num{bits}"),
            Type::Text(info) => write!(f, "{}", info.lang),
            Type::List { item: Some(item) } => write!(f, "[{item}]"),
            Type::List { item: None } => write!(f, "[?]"),
            Type::Set { item: Some(item) } => write!(f, "|{item}|"),
            Type::Set { item: None } => write!(f, "|?|"),
            Type::Table(info) => match (&info.key, &info.value) {
                (Some(k), Some(v)) => write!(f, "{{{k}={v}}}"),
                _ => write!(f, "{{?=?}}"),
            },
            Type::Pointer { pointed, is_stack } => {
                write!(f, "{}{pointed}", if *is_stack { "&" } else { "@" })
            }
            Type::Optional(Some(inner)) => write!(f, "{inner}?"),
            Type::Optional(None) => write!(f, "none"),
            Type::Struct(info) => write!(f, "{}", info.borrow().name),
            Type::Enum(info) => write!(f, "{}", info.borrow().name),
            Type::Function(info) | Type::Closure(info) => {
                write!(f, "func(")?;
                for (i, arg) in info.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match &arg.ty {
                        Some(t) => write!(f, "{}:{t}", arg.name)?,
                        None => write!(f, "{}", arg.name)?,
                    }
                }
                if !matches!(info.ret, Type::Void) {
                    if info.args.is_empty() {
                        write!(f, "->{}", info.ret)?;
                    } else {
                        write!(f, " -> {}", info.ret)?;
                    }
                }
                write!(f, ")")
            }
            Type::TypeInfo(info) => write!(f, "Type({})", info.name),
            Type::Module { name } => write!(f, "Module({name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = Type::list_of(Type::optional(Type::BigInt));
        let b = Type::list_of(Type::optional(Type::BigInt));
        assert!(type_eq(&a, &b));
        assert!(!type_eq(&Type::int(32), &Type::int(64)));
        assert!(!type_eq(&Type::list_of(Type::BigInt), &Type::set_of(Type::BigInt)));
    }

    #[test]
    fn promotion_is_monotonic() {
        assert!(can_promote(&Type::int(16), &Type::int(32)));
        assert!(!can_promote(&Type::int(32), &Type::int(16)));
        assert!(can_promote(&Type::int(32), &Type::BigInt));
        assert!(!can_promote(&Type::BigInt, &Type::int(32)));
        assert!(can_promote(&Type::num(32), &Type::num(64)));
        assert!(!can_promote(&Type::num(64), &Type::num(32)));
    }

    #[test]
    fn optional_promotion_is_one_way() {
        let opt_int = Type::optional(Type::BigInt);
        assert!(can_promote(&Type::BigInt, &opt_int));
        assert!(!can_promote(&opt_int, &Type::BigInt));
        assert!(can_promote(&opt_int, &Type::Bool));
    }

    #[test]
    fn nums_and_ints_do_not_mix_implicitly() {
        assert!(!can_promote(&Type::int(64), &Type::num(64)));
        assert!(can_promote(&Type::int(16), &Type::num(32)));
        assert!(!can_promote(&Type::int(32), &Type::num(32)));
        assert!(!can_promote(&Type::num(32), &Type::int(64)));
    }

    #[test]
    fn completion_lattice() {
        let unknown_opt = Type::Optional(None);
        let int_opt = Type::optional(Type::BigInt);
        assert_eq!(most_complete_type(&unknown_opt, &int_opt), Some(int_opt.clone()));
        assert_eq!(most_complete_type(&int_opt, &unknown_opt), Some(int_opt));
        assert_eq!(
            most_complete_type(&Type::list_of(Type::BigInt), &Type::list_of(Type::num(64))),
            None
        );
    }

    #[test]
    fn incompleteness_is_transitive() {
        assert!(is_incomplete_type(&Type::Optional(None)));
        assert!(is_incomplete_type(&Type::list_of(Type::Optional(None))));
        assert!(is_incomplete_type(&Type::List { item: None }));
        assert!(!is_incomplete_type(&Type::list_of(Type::optional(Type::BigInt))));
    }

    #[test]
    fn precision_ordering() {
        assert_eq!(compare_precision(&Type::int(16), &Type::int(64)), Precision::Less);
        assert_eq!(compare_precision(&Type::int(64), &Type::int(16)), Precision::More);
        assert_eq!(compare_precision(&Type::BigInt, &Type::int(64)), Precision::More);
        assert_eq!(compare_precision(&Type::num(32), &Type::num(32)), Precision::Equal);
        assert_eq!(compare_precision(&Type::int(32), &Type::num(64)), Precision::Incomparable);
        assert_eq!(compare_precision(&Type::Byte, &Type::int(32)), Precision::Incomparable);
    }

    #[test]
    fn abort_unifies_with_anything() {
        assert_eq!(type_or_type(Some(&Type::Abort), Some(&Type::BigInt)), Some(Type::BigInt));
        assert_eq!(
            type_or_type(Some(&Type::Return(Box::new(Type::Void))), Some(&Type::Bool)),
            Some(Type::Bool)
        );
        assert_eq!(type_or_type(Some(&Type::Bool), Some(&Type::BigInt)), None);
    }

    #[test]
    fn sizes_match_the_c_abi() {
        assert_eq!(type_size(&Type::int(32)), 4);
        assert_eq!(type_size(&Type::Bool), 1);
        assert_eq!(type_size(&Type::pointer_to(Type::BigInt, false)), 8);
        assert_eq!(type_size(&Type::Closure(Rc::new(FunctionInfo {
            args: vec![],
            ret: Type::Void,
        }))), 16);
        // Optional Int64 needs a has_value flag padded to alignment.
        assert_eq!(type_size(&Type::optional(Type::int(64))), 16);
        // Optional pointers are zero-cost.
        assert_eq!(type_size(&Type::optional(Type::pointer_to(Type::Memory, false))), 8);
    }

    #[test]
    fn stack_memory_is_found_transitively() {
        let stack_ptr = Type::pointer_to(Type::BigInt, true);
        assert!(has_stack_memory(&stack_ptr));
        assert!(has_stack_memory(&Type::optional(stack_ptr.clone())));
        assert!(!has_stack_memory(&Type::pointer_to(Type::BigInt, false)));
    }
}
