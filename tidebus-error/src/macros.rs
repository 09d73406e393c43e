/// Немедленно возвращает ошибку из текущей функции.
///
/// Формы:
/// - `bail!(err)` — готовая ошибка, реализующая `ErrorExt`, или `StackError`;
/// - `bail!(code, "msg")` — `GenericError` с кодом и сообщением;
/// - `bail!(code, "fmt {}", arg)` — то же, с форматированием.
///
/// ```ignore
/// use tidebus_error::{bail, StatusCode};
///
/// fn check_capacity(capacity: usize) -> tidebus_error::TidebusResult<()> {
///     if capacity == 0 {
///         bail!(StatusCode::InvalidArgs, "capacity must be positive");
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $msg:expr) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, $msg)
        ))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, format!($fmt, $($arg)*))
        ))
    };
}

/// Проверяет условие и вызывает `bail!`, если оно ложно.
///
/// Формы аналогичны `bail!`.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $code:expr, $msg:expr) => {
        if !($cond) {
            $crate::bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($code, $fmt, $($arg)*);
        }
    };
}

/// Добавляет контекст к `Result`, превращая ошибку в `StackError`.
#[macro_export]
macro_rules! context {
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => Ok(val),
            Err(e) => Err($crate::StackError::from(e).context($msg)),
        }
    };
    ($result:expr, $fmt:expr, $($arg:tt)*) => {
        match $result {
            Ok(val) => Ok(val),
            Err(e) => Err($crate::StackError::from(e).context(format!($fmt, $($arg)*))),
        }
    };
}

/// Трейт-расширение для `Result` с методами контекстирования.
pub trait ResultExt<T> {
    /// Оборачивает ошибку в `StackError` и добавляет контекст.
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>;

    /// Ленивый вариант `context`: строка строится только при ошибке.
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
    {
        self.map_err(|e| e.into().context(ctx))
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
