//! Arithmetic and comparison dispatch.
//!
//! Every binary operator is a closed table over the operand type pair,
//! written as explicit match arms. Numeric pairs promote Int to Float when
//! mixed; Char pairs stay Char; anything outside the table is a typed
//! runtime error. `and`/`or`/`!` coerce through truthiness instead and are
//! defined for every operand.

use crate::{
    bytecode::Opcode,
    error::EngineError,
    heap::{Heap, HeapData},
    value::Value,
};

fn op_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Pow => "^",
        Opcode::Mod => "%",
        Opcode::Lt => "<",
        Opcode::Lte => "<=",
        Opcode::Gt => ">",
        Opcode::Gte => ">=",
        Opcode::Eq => "==",
        Opcode::Neq => "!=",
        Opcode::ApproxEq => "~=",
        _ => "?",
    }
}

fn type_error(op: Opcode, lhs: &Value, rhs: &Value, heap: &Heap) -> EngineError {
    EngineError::runtime(format!(
        "binary operation {} not defined for types {} and {}",
        op_symbol(op),
        lhs.type_name(heap),
        rhs.type_name(heap),
    ))
}

/// Element-wise equality over two values, used by `==`/`!=` on strings and
/// arrays. Numeric pairs compare with promotion; reference pairs compare
/// structurally.
pub(crate) fn values_eq(lhs: &Value, rhs: &Value, heap: &Heap) -> bool {
    match (lhs, rhs) {
        (Value::None, Value::None) => true,
        (Value::None, _) | (_, Value::None) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Char(a), Value::Char(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f32) == *b,
        (Value::Func(a), Value::Func(b)) => a == b,
        (Value::Userdata(a), Value::Userdata(b)) => a == b,
        (Value::Ref(a), Value::Ref(b)) => {
            if a == b {
                return true;
            }
            match (heap.get(*a), heap.get(*b)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => s1.as_bytes() == s2.as_bytes(),
                (HeapData::Array(v1), HeapData::Array(v2)) => {
                    v1.len() == v2.len() && v1.iter().zip(v2.iter()).all(|(a, b)| values_eq(a, b, heap))
                }
                (HeapData::Range(r1), HeapData::Range(r2)) => r1 == r2,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Applies one binary opcode to its operands.
pub(crate) fn apply_binary(
    op: Opcode,
    lhs: &Value,
    rhs: &Value,
    heap: &Heap,
    approx_threshold: f32,
) -> Result<Value, EngineError> {
    match op {
        Opcode::Add => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f32 + b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f32)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Char(a), Value::Char(b)) => Ok(Value::Char(a.wrapping_add(*b))),
            _ => Err(type_error(op, lhs, rhs, heap)),
        },
        Opcode::Sub => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f32 - b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a - *b as f32)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            (Value::Char(a), Value::Char(b)) => Ok(Value::Char(a.wrapping_sub(*b))),
            _ => Err(type_error(op, lhs, rhs, heap)),
        },
        Opcode::Mul => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f32 * b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a * *b as f32)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
            (Value::Char(a), Value::Char(b)) => Ok(Value::Char(a.wrapping_mul(*b))),
            _ => Err(type_error(op, lhs, rhs, heap)),
        },
        // division always produces a float for numeric pairs
        Opcode::Div => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Float(*a as f32 / *b as f32)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f32 / b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a / *b as f32)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
            (Value::Char(a), Value::Char(b)) => {
                if *b == 0 {
                    Err(EngineError::runtime("char division by zero"))
                } else {
                    Ok(Value::Char(a / b))
                }
            }
            _ => Err(type_error(op, lhs, rhs, heap)),
        },
        Opcode::Pow => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int((*a as f32).powf(*b as f32) as i32)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float((*a as f32).powf(*b))),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a.powf(*b as f32))),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a.powf(*b))),
            _ => Err(type_error(op, lhs, rhs, heap)),
        },
        Opcode::Mod => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    Err(EngineError::runtime("integer modulo by zero"))
                } else {
                    Ok(Value::Int(a.wrapping_rem(*b)))
                }
            }
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float((*a as f32) % b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a % *b as f32)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a % b)),
            _ => Err(type_error(op, lhs, rhs, heap)),
        },
        Opcode::And => Ok(Value::Bool(lhs.to_bool(heap) && rhs.to_bool(heap))),
        Opcode::Or => Ok(Value::Bool(lhs.to_bool(heap) || rhs.to_bool(heap))),
        Opcode::Lt => compare(op, lhs, rhs, heap, |ord| ord == std::cmp::Ordering::Less),
        Opcode::Lte => compare(op, lhs, rhs, heap, |ord| ord != std::cmp::Ordering::Greater),
        Opcode::Gt => compare(op, lhs, rhs, heap, |ord| ord == std::cmp::Ordering::Greater),
        Opcode::Gte => compare(op, lhs, rhs, heap, |ord| ord != std::cmp::Ordering::Less),
        Opcode::Eq => equality(op, lhs, rhs, heap, false),
        Opcode::Neq => equality(op, lhs, rhs, heap, true),
        Opcode::ApproxEq => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a == b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Bool((*a as f32 - b).abs() < approx_threshold)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Bool((a - *b as f32).abs() < approx_threshold)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Bool((a - b).abs() < approx_threshold)),
            (Value::Char(a), Value::Char(b)) => Ok(Value::Bool(a == b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a == b)),
            _ => Err(type_error(op, lhs, rhs, heap)),
        },
        _ => unreachable!("not a binary opcode: {op:?}"),
    }
}

/// Ordering comparisons over numeric pairs and Char pairs.
fn compare(
    op: Opcode,
    lhs: &Value,
    rhs: &Value,
    heap: &Heap,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EngineError> {
    let ord = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Char(a), Value::Char(b)) => a.cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f32).partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f32)).unwrap_or(std::cmp::Ordering::Greater),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater),
        _ => return Err(type_error(op, lhs, rhs, heap)),
    };
    Ok(Value::Bool(accept(ord)))
}

/// Equality: numeric and immediate pairs per the table, plus element-wise
/// comparison for strings and arrays. None compares equal only to None.
fn equality(op: Opcode, lhs: &Value, rhs: &Value, heap: &Heap, negate: bool) -> Result<Value, EngineError> {
    let eq = match (lhs, rhs) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
        | (Value::Char(_), Value::Char(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::None, _)
        | (_, Value::None)
        | (Value::Func(_), Value::Func(_))
        | (Value::Userdata(_), Value::Userdata(_)) => values_eq(lhs, rhs, heap),
        (Value::Ref(a), Value::Ref(b)) => match (heap.get(*a), heap.get(*b)) {
            (HeapData::Str(_), HeapData::Str(_)) | (HeapData::Array(_), HeapData::Array(_)) => {
                values_eq(lhs, rhs, heap)
            }
            _ => return Err(type_error(op, lhs, rhs, heap)),
        },
        _ => return Err(type_error(op, lhs, rhs, heap)),
    };
    Ok(Value::Bool(eq != negate))
}

/// Applies a unary opcode.
pub(crate) fn apply_unary(op: Opcode, value: &Value, heap: &Heap) -> Result<Value, EngineError> {
    match op {
        Opcode::Not => Ok(Value::Bool(!value.to_bool(heap))),
        Opcode::Neg => match value {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(EngineError::runtime(format!(
                "unary operation - not defined for type {}",
                value.type_name(heap)
            ))),
        },
        _ => unreachable!("not a unary opcode: {op:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Str;

    fn heap() -> Heap {
        Heap::new()
    }

    #[test]
    fn int_float_promotion() {
        let h = heap();
        let r = apply_binary(Opcode::Add, &Value::Int(1), &Value::Float(2.5), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Float(v) if v == 3.5));
    }

    #[test]
    fn int_division_produces_float() {
        let h = heap();
        let r = apply_binary(Opcode::Div, &Value::Int(3), &Value::Int(2), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Float(v) if v == 1.5));
    }

    #[test]
    fn char_pairs_stay_char() {
        let h = heap();
        let r = apply_binary(Opcode::Add, &Value::Char(b'a'), &Value::Char(1), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Char(b'b')));
    }

    #[test]
    fn bool_pairs_only_support_equality() {
        let h = heap();
        assert!(apply_binary(Opcode::Add, &Value::Bool(true), &Value::Bool(false), &h, 1e-7).is_err());
        let r = apply_binary(Opcode::Eq, &Value::Bool(true), &Value::Bool(true), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Bool(true)));
    }

    #[test]
    fn string_equality_is_element_wise() {
        let mut h = heap();
        let a = h.allocate(HeapData::Str(Str::from_bytes(b"abc".to_vec())));
        let b = h.allocate(HeapData::Str(Str::from_bytes(b"abc".to_vec())));
        let r = apply_binary(Opcode::Eq, &Value::Ref(a), &Value::Ref(b), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Bool(true)));
        Value::Ref(a).drop_with_heap(&mut h);
        Value::Ref(b).drop_with_heap(&mut h);
    }

    #[test]
    fn approx_eq_uses_threshold() {
        let h = heap();
        let r = apply_binary(Opcode::ApproxEq, &Value::Float(1.0), &Value::Float(1.0 + 1e-8), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Bool(true)));
        let r = apply_binary(Opcode::ApproxEq, &Value::Float(1.0), &Value::Float(1.01), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Bool(false)));
    }

    #[test]
    fn unsupported_pair_is_a_typed_error() {
        let mut h = heap();
        let s = h.allocate(HeapData::Str(Str::from_bytes(b"x".to_vec())));
        let err = apply_binary(Opcode::Add, &Value::Int(1), &Value::Ref(s), &h, 1e-7).unwrap_err();
        assert!(err.message.contains("int and string"));
        Value::Ref(s).drop_with_heap(&mut h);
    }

    #[test]
    fn truthiness_ops_accept_any_pair() {
        let h = heap();
        let r = apply_binary(Opcode::And, &Value::Int(1), &Value::Bool(true), &h, 1e-7).unwrap();
        assert!(matches!(r, Value::Bool(true)));
        let r = apply_unary(Opcode::Not, &Value::None, &h).unwrap();
        assert!(matches!(r, Value::Bool(true)));
    }

    #[test]
    fn unary_minus() {
        let h = heap();
        assert!(matches!(apply_unary(Opcode::Neg, &Value::Int(5), &h).unwrap(), Value::Int(-5)));
        assert!(apply_unary(Opcode::Neg, &Value::Bool(true), &h).is_err());
    }
}
