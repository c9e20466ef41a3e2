use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayD, Zip};

/// A tensor-valued variable assignment. All latent state in the engine is
/// carried as shaped `f64` arrays.
pub type Tensor = ArrayD<f64>;

/// Opaque identifier of one latent variable.
///
/// Identity and equality are the only semantics. The `Ord` impl exists so
/// that map iteration is deterministic under a fixed RNG seed; it does not
/// imply any meaningful order between variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableReference(u64);

impl VariableReference {
    pub const fn new(id: u64) -> Self {
        VariableReference(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VariableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var_{}", self.0)
    }
}

/// A `VariableReference -> Tensor` map with elementwise algebra.
///
/// Position, momentum and gradient maps are all `VariableValues`. Binary
/// operations require both maps to have identical key sets and shapes;
/// that invariant is established at sampler construction and checked with
/// debug assertions here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableValues {
    values: BTreeMap<VariableReference, Tensor>,
}

impl VariableValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variable: VariableReference, value: Tensor) {
        self.values.insert(variable, value);
    }

    pub fn get(&self, variable: &VariableReference) -> Option<&Tensor> {
        self.values.get(variable)
    }

    pub(crate) fn get_mut(&mut self, variable: &VariableReference) -> Option<&mut Tensor> {
        self.values.get_mut(variable)
    }

    pub fn contains(&self, variable: &VariableReference) -> bool {
        self.values.contains_key(variable)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableReference> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariableReference, &Tensor)> {
        self.values.iter()
    }

    /// Overwrite the entries named by `updates`, leaving the rest untouched.
    pub fn apply(&mut self, updates: &VariableValues) {
        for (variable, value) in updates.iter() {
            self.values.insert(*variable, value.clone());
        }
    }

    /// The sparse subset of `self` restricted to `variables`.
    pub fn select<'a>(&self, variables: impl IntoIterator<Item = &'a VariableReference>) -> Self {
        let values = variables
            .into_iter()
            .filter_map(|v| self.values.get(v).map(|t| (*v, t.clone())))
            .collect();
        VariableValues { values }
    }

    /// A map with the same keys and shapes, filled with zeros.
    pub fn zeros_like(&self) -> Self {
        let values = self
            .values
            .iter()
            .map(|(v, t)| (*v, Tensor::zeros(t.raw_dim())))
            .collect();
        VariableValues { values }
    }

    /// Elementwise `self += scale * other`.
    pub fn add_scaled(&mut self, other: &VariableValues, scale: f64) {
        debug_assert_eq!(self.len(), other.len());
        for (variable, value) in self.values.iter_mut() {
            let rhs = other
                .values
                .get(variable)
                .expect("variable missing from rhs");
            debug_assert_eq!(value.shape(), rhs.shape());
            Zip::from(value).and(rhs).for_each(|x, &y| *x += scale * y);
        }
    }

    /// Elementwise `scale * self` as a new map.
    pub fn scaled(&self, scale: f64) -> Self {
        let values = self
            .values
            .iter()
            .map(|(v, t)| (*v, t.mapv(|x| scale * x)))
            .collect();
        VariableValues { values }
    }

    pub fn negated(&self) -> Self {
        self.scaled(-1.0)
    }

    /// Sum over all variables of the elementwise product.
    pub fn dot(&self, other: &VariableValues) -> f64 {
        debug_assert_eq!(self.len(), other.len());
        self.values
            .iter()
            .map(|(variable, value)| {
                let rhs = other
                    .values
                    .get(variable)
                    .expect("variable missing from rhs");
                debug_assert_eq!(value.shape(), rhs.shape());
                Zip::from(value).and(rhs).fold(0.0, |acc, &x, &y| acc + x * y)
            })
            .sum()
    }

    /// Elementwise product as a new map.
    pub fn mul(&self, other: &VariableValues) -> Self {
        self.zip_with(other, |x, y| x * y)
    }

    /// Elementwise quotient as a new map.
    pub fn div(&self, other: &VariableValues) -> Self {
        self.zip_with(other, |x, y| x / y)
    }

    /// Apply `f` to every element, keeping keys and shapes.
    pub fn mapv(&self, f: impl Fn(f64) -> f64) -> Self {
        let values = self.values.iter().map(|(v, t)| (*v, t.mapv(&f))).collect();
        VariableValues { values }
    }

    /// Total scalar dimensionality across all variables.
    pub fn total_dim(&self) -> usize {
        self.values.values().map(|t| t.len()).sum()
    }

    pub fn all_finite(&self) -> bool {
        self.values
            .values()
            .all(|t| t.iter().all(|x| x.is_finite()))
    }

    fn zip_with(&self, other: &VariableValues, f: impl Fn(f64, f64) -> f64) -> Self {
        debug_assert_eq!(self.len(), other.len());
        let values = self
            .values
            .iter()
            .map(|(variable, value)| {
                let rhs = other
                    .values
                    .get(variable)
                    .expect("variable missing from rhs");
                debug_assert_eq!(value.shape(), rhs.shape());
                let mut out = value.clone();
                Zip::from(&mut out).and(rhs).for_each(|x, &y| *x = f(*x, y));
                (*variable, out)
            })
            .collect();
        VariableValues { values }
    }
}

impl FromIterator<(VariableReference, Tensor)> for VariableValues {
    fn from_iter<I: IntoIterator<Item = (VariableReference, Tensor)>>(iter: I) -> Self {
        VariableValues {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn values(entries: &[(u64, &[f64])]) -> VariableValues {
        entries
            .iter()
            .map(|(id, data)| (VariableReference::new(*id), arr1(data).into_dyn()))
            .collect()
    }

    #[test]
    fn add_scaled_is_elementwise_axpy() {
        let mut a = values(&[(0, &[1.0, 2.0]), (1, &[3.0])]);
        let b = values(&[(0, &[10.0, 20.0]), (1, &[30.0])]);
        a.add_scaled(&b, 0.5);
        assert_eq!(a, values(&[(0, &[6.0, 12.0]), (1, &[18.0])]));
    }

    #[test]
    fn dot_sums_across_variables() {
        let a = values(&[(0, &[1.0, 2.0]), (1, &[3.0])]);
        let b = values(&[(0, &[4.0, 5.0]), (1, &[6.0])]);
        assert_eq!(a.dot(&b), 4.0 + 10.0 + 18.0);
    }

    #[test]
    fn apply_overwrites_only_named_entries() {
        let mut a = values(&[(0, &[1.0]), (1, &[2.0])]);
        let sparse = values(&[(1, &[9.0])]);
        a.apply(&sparse);
        assert_eq!(a, values(&[(0, &[1.0]), (1, &[9.0])]));
    }

    #[test]
    fn total_dim_counts_scalars() {
        let a = values(&[(0, &[1.0, 2.0, 3.0]), (1, &[4.0])]);
        assert_eq!(a.total_dim(), 4);
    }

    #[test]
    fn iteration_order_is_deterministic() {
        let a = values(&[(3, &[0.0]), (1, &[0.0]), (2, &[0.0])]);
        let order: Vec<u64> = a.variables().map(|v| v.id()).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
