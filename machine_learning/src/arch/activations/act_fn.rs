use super::{Relu, Sigmoid};
use crate::arch::spec::ActFnSpec;

#[derive(Clone, Debug)]
pub enum ActFn {
    Relu(Relu),
    Sigmoid(Sigmoid),
}

impl ActFn {
    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn sigmoid(amp: f32) -> Self {
        ActFn::Sigmoid(Sigmoid::new(amp))
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Relu(a) => a.f(x),
            ActFn::Sigmoid(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Relu(a) => a.df(x),
            ActFn::Sigmoid(a) => a.df(x),
        }
    }

    /// Returns the description this activation was built from.
    pub fn spec(&self) -> ActFnSpec {
        match self {
            ActFn::Relu(_) => ActFnSpec::Relu,
            ActFn::Sigmoid(a) => ActFnSpec::Sigmoid { amp: a.amp() },
        }
    }
}

impl From<ActFnSpec> for ActFn {
    fn from(spec: ActFnSpec) -> Self {
        match spec {
            ActFnSpec::Relu => ActFn::relu(),
            ActFnSpec::Sigmoid { amp } => ActFn::sigmoid(amp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activations_dispatch_to_their_function() {
        let relu = ActFn::relu();
        assert_eq!(relu.f(-2.), 0.);
        assert_eq!(relu.f(3.), 3.);
        assert_eq!(relu.df(3.), 1.);

        let sigmoid = ActFn::sigmoid(1.);
        assert!((sigmoid.f(0.) - 0.5).abs() < 1e-6);
        assert!((sigmoid.df(0.) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn activations_rebuild_from_their_description() {
        for spec in [ActFnSpec::Relu, ActFnSpec::Sigmoid { amp: 2. }] {
            assert_eq!(ActFn::from(spec).spec(), spec);
        }
    }
}
