use std::fmt;

use crate::module::Module;

pub type AliasId = usize;
pub type StructId = usize;
pub type FunctionId = usize;

/// Primitive element kinds a tensor can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl DataType {
    pub fn is_bool(self) -> bool {
        self == DataType::Bool
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F16 | DataType::F32 | DataType::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Whether an element-wise `dataTypeCast` from `self` to `target` is
    /// representable. Numeric kinds convert freely; `bool` widens to the
    /// integer kinds but nothing narrows back into `bool`.
    pub fn can_cast_to(self, target: DataType) -> bool {
        if self == target {
            return true;
        }
        match self {
            DataType::Bool => target.is_integer(),
            _ => target.is_numeric(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Ordered dimensions of a tensor. The empty shape is a scalar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TensorShape(pub Vec<usize>);

impl TensorShape {
    pub fn scalar() -> Self {
        TensorShape(Vec::new())
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn element_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Right-aligned broadcast: dimensions pair up from the trailing end and
    /// must be equal or 1 on either side.
    pub fn broadcast(&self, other: &TensorShape) -> Option<TensorShape> {
        let mut dims = Vec::with_capacity(self.rank().max(other.rank()));
        let mut lhs = self.0.iter().rev();
        let mut rhs = other.0.iter().rev();
        loop {
            match (lhs.next(), rhs.next()) {
                (None, None) => break,
                (Some(&d), None) | (None, Some(&d)) => dims.push(d),
                (Some(&a), Some(&b)) => {
                    if a == b || b == 1 {
                        dims.push(a);
                    } else if a == 1 {
                        dims.push(b);
                    } else {
                        return None;
                    }
                }
            }
        }
        dims.reverse();
        Some(TensorShape(dims))
    }

    /// Batched matrix product. Both operands need rank >= 2, equal batch
    /// dimensions, and agreeing inner dimensions.
    pub fn matmul(&self, other: &TensorShape) -> Option<TensorShape> {
        let a = &self.0;
        let b = &other.0;
        if a.len() < 2 || a.len() != b.len() {
            return None;
        }
        let batch = a.len() - 2;
        if a[..batch] != b[..batch] || a[batch + 1] != b[batch] {
            return None;
        }
        let mut dims = a[..batch].to_vec();
        dims.push(a[batch]);
        dims.push(b[batch + 1]);
        Some(TensorShape(dims))
    }

    /// Shape with the given dimensions removed, for reductions. Dimensions
    /// must be in range and pairwise distinct.
    pub fn dropping(&self, dimensions: &[usize]) -> Option<TensorShape> {
        let mut seen = vec![false; self.rank()];
        for &dim in dimensions {
            if dim >= self.rank() || seen[dim] {
                return None;
            }
            seen[dim] = true;
        }
        let dims = self
            .0
            .iter()
            .enumerate()
            .filter(|(i, _)| !seen[*i])
            .map(|(_, &d)| d)
            .collect();
        Some(TensorShape(dims))
    }

    pub fn transposed(&self) -> TensorShape {
        let mut dims = self.0.clone();
        dims.reverse();
        TensorShape(dims)
    }

    /// Shape after dropping the leading dimension, for element access.
    pub fn dropping_first(&self) -> Option<TensorShape> {
        if self.is_scalar() {
            return None;
        }
        Some(TensorShape(self.0[1..].to_vec()))
    }

    /// Concatenation of `shapes` along `axis`: all must agree everywhere
    /// except `axis`, which sums.
    pub fn concatenating(shapes: &[&TensorShape], axis: usize) -> Option<TensorShape> {
        let first = *shapes.first()?;
        if axis >= first.rank() {
            return None;
        }
        let mut dims = first.0.clone();
        for shape in &shapes[1..] {
            if shape.rank() != first.rank() {
                return None;
            }
            for (i, (&a, &b)) in first.0.iter().zip(shape.0.iter()).enumerate() {
                if i != axis && a != b {
                    return None;
                }
            }
            dims[axis] += shape.0[axis];
        }
        Some(TensorShape(dims))
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            return f.write_str("scalar");
        }
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" x ")?;
            }
            write!(f, "{dim}")?;
        }
        Ok(())
    }
}

/// A fully resolved IR type. Nominal references are resolved during parsing,
/// so aliases and structs appear here as indices into the owning module.
/// `Invalid` is the placeholder for a function prototype that has not been
/// parsed yet and the sentinel for a failed result-type derivation.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Invalid,
    Void,
    Tensor(TensorShape, DataType),
    Array(usize, Box<Type>),
    Tuple(Vec<Type>),
    Function(Vec<Type>, Box<Type>),
    Pointer(Box<Type>),
    Alias(AliasId),
    Struct(StructId),
}

impl Type {
    pub fn scalar(data_type: DataType) -> Type {
        Type::Tensor(TensorShape::scalar(), data_type)
    }

    /// Structural form with every non-opaque alias resolved, at every level.
    /// Structs stay nominal; an alias bound to `opaque` has nothing to
    /// resolve to and stays as itself.
    pub fn canonical(&self, module: &Module) -> Type {
        match self {
            Type::Alias(id) => match &module.type_aliases[*id].ty {
                Some(underlying) => underlying.canonical(module),
                None => Type::Alias(*id),
            },
            Type::Array(count, element) => {
                Type::Array(*count, Box::new(element.canonical(module)))
            }
            Type::Tuple(elements) => {
                Type::Tuple(elements.iter().map(|t| t.canonical(module)).collect())
            }
            Type::Function(arguments, ret) => Type::Function(
                arguments.iter().map(|t| t.canonical(module)).collect(),
                Box::new(ret.canonical(module)),
            ),
            Type::Pointer(pointee) => Type::Pointer(Box::new(pointee.canonical(module))),
            other => other.clone(),
        }
    }

    /// A scalar tensor of an integer data type, after canonicalization.
    pub fn is_scalar_integer(&self, module: &Module) -> bool {
        matches!(
            self.canonical(module),
            Type::Tensor(shape, dt) if shape.is_scalar() && dt.is_integer()
        )
    }

    pub fn display<'a>(&'a self, module: &'a Module) -> TypeDisplay<'a> {
        TypeDisplay { ty: self, module }
    }
}

/// Renders a type with nominal names looked up in its module.
pub struct TypeDisplay<'a> {
    ty: &'a Type,
    module: &'a Module,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.module;
        match self.ty {
            Type::Invalid => f.write_str("<invalid>"),
            Type::Void => f.write_str("void"),
            Type::Tensor(shape, dt) if shape.is_scalar() => write!(f, "{dt}"),
            Type::Tensor(shape, dt) => write!(f, "<{shape} x {dt}>"),
            Type::Array(count, element) => write!(f, "[{count} x {}]", element.display(m)),
            Type::Tuple(elements) => {
                f.write_str("(")?;
                for (i, ty) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", ty.display(m))?;
                }
                f.write_str(")")
            }
            Type::Function(arguments, ret) => {
                f.write_str("(")?;
                for (i, ty) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", ty.display(m))?;
                }
                write!(f, ") -> {}", ret.display(m))
            }
            Type::Pointer(pointee) => write!(f, "*{}", pointee.display(m)),
            Type::Alias(id) => write!(f, "%{}", m.type_aliases[*id].name),
            Type::Struct(id) => write!(f, "%{}", m.structs[*id].name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_pads_and_merges_unit_dims() {
        let a = TensorShape(vec![4, 1, 5]);
        let b = TensorShape(vec![3, 5]);
        assert_eq!(a.broadcast(&b), Some(TensorShape(vec![4, 3, 5])));
        assert_eq!(b.broadcast(&a), Some(TensorShape(vec![4, 3, 5])));

        let c = TensorShape(vec![2, 5]);
        assert_eq!(a.broadcast(&c), None);
    }

    #[test]
    fn scalar_broadcasts_with_anything() {
        let scalar = TensorShape::scalar();
        let t = TensorShape(vec![2, 3]);
        assert_eq!(scalar.broadcast(&t), Some(t.clone()));
    }

    #[test]
    fn matmul_checks_inner_and_batch_dims() {
        let a = TensorShape(vec![2, 3]);
        let b = TensorShape(vec![3, 4]);
        assert_eq!(a.matmul(&b), Some(TensorShape(vec![2, 4])));
        assert_eq!(b.matmul(&a), None);

        let ba = TensorShape(vec![8, 2, 3]);
        let bb = TensorShape(vec![8, 3, 4]);
        assert_eq!(ba.matmul(&bb), Some(TensorShape(vec![8, 2, 4])));
        let bc = TensorShape(vec![7, 3, 4]);
        assert_eq!(ba.matmul(&bc), None);
    }

    #[test]
    fn dropping_rejects_repeated_and_out_of_range_dims() {
        let shape = TensorShape(vec![2, 3, 4]);
        assert_eq!(shape.dropping(&[1]), Some(TensorShape(vec![2, 4])));
        assert_eq!(shape.dropping(&[0, 2]), Some(TensorShape(vec![3])));
        assert_eq!(shape.dropping(&[1, 1]), None);
        assert_eq!(shape.dropping(&[3]), None);
    }

    #[test]
    fn concatenating_sums_along_axis() {
        let a = TensorShape(vec![2, 3]);
        let b = TensorShape(vec![4, 3]);
        assert_eq!(
            TensorShape::concatenating(&[&a, &b], 0),
            Some(TensorShape(vec![6, 3]))
        );
        assert_eq!(TensorShape::concatenating(&[&a, &b], 1), None);
    }
}
