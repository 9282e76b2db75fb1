/// `assert!`, but only under the "extra_assertions" feature.
///
/// The disabled arm still captures the condition in a never-called closure so
/// that values computed only for an assertion don't trip unused warnings, and
/// so that the condition keeps type checking on every build.
#[cfg(feature = "extra_assertions")]
macro_rules! extra_assert {
    ( $( $arg:tt )* ) => {
        assert!( $( $arg )* );
    };
}

#[cfg(not(feature = "extra_assertions"))]
macro_rules! extra_assert {
    ( $cond:expr $( , $rest:expr )* $(,)? ) => {
        let _ = || { let _ = ($cond, $( &$rest, )*); };
    };
}

/// `assert_eq!`, but only under the "extra_assertions" feature.
#[cfg(feature = "extra_assertions")]
macro_rules! extra_assert_eq {
    ( $( $arg:tt )* ) => {
        assert_eq!( $( $arg )* );
    };
}

#[cfg(not(feature = "extra_assertions"))]
macro_rules! extra_assert_eq {
    ( $left:expr , $right:expr $( , $rest:expr )* $(,)? ) => {
        let _ = || { let _ = (&$left, &$right, $( &$rest, )*); };
    };
}
