pub mod connector;

pub use connector::{
    ColumnProfile, ColumnSchema, Connector, ConnectorFactory, IdentifierCase, QueryResult, Row,
};
