pub mod protocol;
pub mod routing;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use protocol::*;
pub use routing::*;
pub use transport::*;
