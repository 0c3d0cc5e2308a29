//! Non-owning, schema-aware navigation over a time-series value.

use tickflow_common::{EngineTime, ScalarValue};

use crate::meta::TsMeta;

use super::value::{TsValue, Value};

/// A borrowed view of one endpoint in a value tree. Views are cheap to copy
/// and navigate; they never own storage.
#[derive(Clone, Copy)]
pub struct TsView<'a> {
    value: &'a TsValue,
}

impl<'a> TsView<'a> {
    pub fn new(value: &'a TsValue) -> Self {
        TsView { value }
    }

    pub fn meta(&self) -> &'static TsMeta {
        self.value.meta
    }

    pub fn valid(&self) -> bool {
        self.value.valid()
    }

    pub fn modified(&self, now: EngineTime) -> bool {
        self.value.modified(now)
    }

    pub fn last_modified(&self) -> EngineTime {
        self.value.last_modified()
    }

    pub fn as_scalar(&self) -> Option<ScalarValue> {
        self.value.scalar()
    }

    pub fn field(&self, name: &str) -> Option<TsView<'a>> {
        self.value.child_by_name(name).map(TsView::new)
    }

    pub fn element(&self, index: usize) -> Option<TsView<'a>> {
        self.value.child_at(index).map(TsView::new)
    }

    pub fn entry(&self, key: &ScalarValue) -> Option<TsView<'a>> {
        self.value.child_by_key(key).map(TsView::new)
    }

    pub fn child_count(&self) -> usize {
        self.value.child_count()
    }

    pub fn snapshot(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        self.value.snapshot(now, start_time)
    }

    /// The change produced at `now`, if any.
    pub fn delta_view(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        self.value.delta_snapshot(now, start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta;
    use tickflow_common::ScalarKind;

    #[test]
    fn view_navigates_bundles() {
        let m = meta::tsb(
            &[("px", meta::ts(ScalarKind::Float)), ("qty", meta::ts(ScalarKind::Int))],
            "Order",
        );
        let mut v = TsValue::new(m);
        let t1 = EngineTime::from_secs(1);
        v.child_at_mut(1).unwrap().set_scalar(4i64.into(), t1);

        let view = TsView::new(&v);
        assert_eq!(view.field("qty").unwrap().as_scalar(), Some(4i64.into()));
        assert!(view.field("px").unwrap().as_scalar().is_none());
        assert!(view.field("nope").is_none());
        assert!(view.modified(t1));
    }
}
