//! The time-series value model: owned values, windows, keyed storage,
//! outputs with subscriber lists, inputs with links, and references.

pub mod dict;
pub mod input;
pub mod output;
pub mod path;
pub mod reference;
pub mod set;
pub mod value;
pub mod view;
pub mod window;

pub use dict::DictStorage;
pub use input::{RefTargetLink, TsInput, TsLink};
pub use output::{OutputHandle, TsOutput};
pub use path::{PathSeg, TsPath, format_path, is_prefix, overlaps};
pub use reference::{RebindDelta, TsReference, compute_rebind_delta};
pub use set::SetStorage;
pub use value::{MapDeltaValue, SetDeltaValue, TsData, TsValue, Value};
pub use view::TsView;
pub use window::{DurationWindow, FixedWindow, WindowData};
