use justerror::Error;

pub type ListResult<T = ()> = Result<T, ListError>;

#[Error]
#[derive(Eq, PartialEq)]
pub enum ListError {
    Key(#[from] KeyError),
    Index(#[from] IndexError),
    Dispatch(#[from] DispatchError),
}

#[Error]
#[derive(Eq, PartialEq)]
pub enum KeyError {
    Duplicate,
    NotFound,
    Mismatch,
}

#[Error]
#[derive(Eq, PartialEq)]
pub enum IndexError {
    OutOfRange,
}

#[Error]
#[derive(Eq, PartialEq)]
pub enum DispatchError {
    ReentrantMutation,
}
