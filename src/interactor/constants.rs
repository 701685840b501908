pub(crate) const TARGET: &str = "live_interactor";
