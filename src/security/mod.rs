mod path;


pub use path::{is_contained, normalize_lexically, PathResolver, ResolvedPath};
