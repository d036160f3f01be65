pub const OBJECT: &str = "lang.Object";
pub const NUMBER: &str = "lang.Number";
pub const LONG: &str = "lang.Long";
pub const DOUBLE: &str = "lang.Double";
pub const BOOLEAN: &str = "lang.Boolean";
pub const CHARACTER: &str = "lang.Character";
pub const STRING: &str = "lang.String";
pub const KEYWORD: &str = "lang.Keyword";
pub const SYMBOL: &str = "lang.Symbol";
pub const PATTERN: &str = "lang.Pattern";
pub const LIST: &str = "lang.List";
pub const VECTOR: &str = "lang.Vector";
pub const MAP: &str = "lang.Map";
pub const SET: &str = "lang.Set";
pub const FN: &str = "lang.Fn";
pub const NATIVE_FN: &str = "lang.NativeFn";
pub const CLASS: &str = "lang.Class";
pub const NAMESPACE: &str = "lang.Namespace";
pub const VAR: &str = "lang.Var";
pub const SPECIAL_FORM: &str = "lang.SpecialForm";
pub const MATH: &str = "lang.Math";
pub const TUPLE: &str = "lang.Tuple";
pub const EXCEPTION: &str = "lang.Exception";
pub const LINKAGE_ERROR: &str = "lang.LinkageError";
pub const ARITY_ERROR: &str = "lang.ArityError";
pub const CLASS_CAST: &str = "lang.ClassCastException";

pub const INIT: &str = "<init>";
pub const INVOKE: &str = "invoke";
