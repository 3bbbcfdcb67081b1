//! Object IDs of the built-in types, sourced from the `pg_type` system
//! catalog.
use super::Oid;

pub const BOOL: Oid = 16;
pub const BYTEA: Oid = 17;
/// Single byte internal `"char"`, not the SQL `char(n)` (that is
/// [`BPCHAR`]).
pub const CHAR: Oid = 18;
/// 63-byte identifier type used by the system catalogs.
pub const NAME: Oid = 19;
pub const INT8: Oid = 20;
pub const INT2: Oid = 21;
pub const INT2VECTOR: Oid = 22;
pub const INT4: Oid = 23;
/// Registered procedure, wire-compatible with [`OID`].
pub const REGPROC: Oid = 24;
pub const TEXT: Oid = 25;
pub const OID: Oid = 26;
pub const TID: Oid = 27;
pub const XID: Oid = 28;
pub const CID: Oid = 29;
pub const OIDVECTOR: Oid = 30;
pub const JSON: Oid = 114;
pub const XML: Oid = 142;
pub const POINT: Oid = 600;
pub const LSEG: Oid = 601;
pub const PATH: Oid = 602;
pub const BOX: Oid = 603;
pub const POLYGON: Oid = 604;
pub const LINE: Oid = 628;
pub const CIDR: Oid = 650;
pub const FLOAT4: Oid = 700;
pub const FLOAT8: Oid = 701;
/// Pseudo-type of string literals the server could not resolve.
pub const UNKNOWN: Oid = 705;
pub const CIRCLE: Oid = 718;
pub const MACADDR8: Oid = 774;
pub const MONEY: Oid = 790;
pub const MACADDR: Oid = 829;
pub const INET: Oid = 869;
pub const BPCHAR: Oid = 1042;
pub const VARCHAR: Oid = 1043;
pub const DATE: Oid = 1082;
pub const TIME: Oid = 1083;
pub const TIMESTAMP: Oid = 1114;
pub const TIMESTAMPTZ: Oid = 1184;
pub const INTERVAL: Oid = 1186;
pub const TIMETZ: Oid = 1266;
pub const BIT: Oid = 1560;
pub const VARBIT: Oid = 1562;
pub const NUMERIC: Oid = 1700;
pub const REFCURSOR: Oid = 1790;
pub const VOID: Oid = 2278;
pub const UUID: Oid = 2950;
pub const JSONB: Oid = 3802;
pub const INT4RANGE: Oid = 3904;
pub const NUMRANGE: Oid = 3906;
pub const TSRANGE: Oid = 3908;
pub const TSTZRANGE: Oid = 3910;
pub const DATERANGE: Oid = 3912;
pub const INT8RANGE: Oid = 3926;

// one-dimensional array types carry their own oids

pub const BOOL_ARRAY: Oid = 1000;
pub const BYTEA_ARRAY: Oid = 1001;
pub const CHAR_ARRAY: Oid = 1002;
pub const NAME_ARRAY: Oid = 1003;
pub const INT2_ARRAY: Oid = 1005;
pub const INT4_ARRAY: Oid = 1007;
pub const TEXT_ARRAY: Oid = 1009;
pub const BPCHAR_ARRAY: Oid = 1014;
pub const VARCHAR_ARRAY: Oid = 1015;
pub const INT8_ARRAY: Oid = 1016;
pub const FLOAT4_ARRAY: Oid = 1021;
pub const FLOAT8_ARRAY: Oid = 1022;
pub const OID_ARRAY: Oid = 1028;
pub const TIMESTAMP_ARRAY: Oid = 1115;
pub const DATE_ARRAY: Oid = 1182;
pub const TIME_ARRAY: Oid = 1183;
pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
pub const INTERVAL_ARRAY: Oid = 1187;
pub const NUMERIC_ARRAY: Oid = 1231;
pub const UUID_ARRAY: Oid = 2951;
pub const JSON_ARRAY: Oid = 199;
pub const JSONB_ARRAY: Oid = 3807;

/// The element oid of a known array type.
pub const fn element_oid(array_oid: Oid) -> Option<Oid> {
    match array_oid {
        BOOL_ARRAY => Some(BOOL),
        BYTEA_ARRAY => Some(BYTEA),
        CHAR_ARRAY => Some(CHAR),
        NAME_ARRAY => Some(NAME),
        INT2_ARRAY => Some(INT2),
        INT4_ARRAY => Some(INT4),
        TEXT_ARRAY => Some(TEXT),
        BPCHAR_ARRAY => Some(BPCHAR),
        VARCHAR_ARRAY => Some(VARCHAR),
        INT8_ARRAY => Some(INT8),
        FLOAT4_ARRAY => Some(FLOAT4),
        FLOAT8_ARRAY => Some(FLOAT8),
        OID_ARRAY => Some(OID),
        TIMESTAMP_ARRAY => Some(TIMESTAMP),
        DATE_ARRAY => Some(DATE),
        TIME_ARRAY => Some(TIME),
        TIMESTAMPTZ_ARRAY => Some(TIMESTAMPTZ),
        INTERVAL_ARRAY => Some(INTERVAL),
        NUMERIC_ARRAY => Some(NUMERIC),
        UUID_ARRAY => Some(UUID),
        JSON_ARRAY => Some(JSON),
        JSONB_ARRAY => Some(JSONB),
        _ => None,
    }
}

/// The array oid of an element type.
pub const fn array_oid(element_oid: Oid) -> Option<Oid> {
    match element_oid {
        BOOL => Some(BOOL_ARRAY),
        BYTEA => Some(BYTEA_ARRAY),
        CHAR => Some(CHAR_ARRAY),
        NAME => Some(NAME_ARRAY),
        INT2 => Some(INT2_ARRAY),
        INT4 => Some(INT4_ARRAY),
        TEXT => Some(TEXT_ARRAY),
        BPCHAR => Some(BPCHAR_ARRAY),
        VARCHAR => Some(VARCHAR_ARRAY),
        INT8 => Some(INT8_ARRAY),
        FLOAT4 => Some(FLOAT4_ARRAY),
        FLOAT8 => Some(FLOAT8_ARRAY),
        OID => Some(OID_ARRAY),
        TIMESTAMP => Some(TIMESTAMP_ARRAY),
        DATE => Some(DATE_ARRAY),
        TIME => Some(TIME_ARRAY),
        TIMESTAMPTZ => Some(TIMESTAMPTZ_ARRAY),
        INTERVAL => Some(INTERVAL_ARRAY),
        NUMERIC => Some(NUMERIC_ARRAY),
        UUID => Some(UUID_ARRAY),
        JSON => Some(JSON_ARRAY),
        JSONB => Some(JSONB_ARRAY),
        _ => None,
    }
}

/// Whether `type_oid` is a known one-dimensional array type.
pub const fn is_array(type_oid: Oid) -> bool {
    element_oid(type_oid).is_some()
}

/// Human-readable name of a type oid, for diagnostics.
pub const fn type_name(type_oid: Oid) -> &'static str {
    match type_oid {
        BOOL => "bool",
        BYTEA => "bytea",
        CHAR => "char",
        NAME => "name",
        INT8 => "int8",
        INT2 => "int2",
        INT2VECTOR => "int2vector",
        INT4 => "int4",
        REGPROC => "regproc",
        TEXT => "text",
        OID => "oid",
        TID => "tid",
        XID => "xid",
        CID => "cid",
        OIDVECTOR => "oidvector",
        JSON => "json",
        XML => "xml",
        POINT => "point",
        LSEG => "lseg",
        PATH => "path",
        BOX => "box",
        POLYGON => "polygon",
        LINE => "line",
        CIDR => "cidr",
        FLOAT4 => "float4",
        FLOAT8 => "float8",
        UNKNOWN => "unknown",
        CIRCLE => "circle",
        MACADDR8 => "macaddr8",
        MONEY => "money",
        MACADDR => "macaddr",
        INET => "inet",
        BPCHAR => "bpchar",
        VARCHAR => "varchar",
        DATE => "date",
        TIME => "time",
        TIMESTAMP => "timestamp",
        TIMESTAMPTZ => "timestamptz",
        INTERVAL => "interval",
        TIMETZ => "timetz",
        BIT => "bit",
        VARBIT => "varbit",
        NUMERIC => "numeric",
        REFCURSOR => "refcursor",
        VOID => "void",
        UUID => "uuid",
        JSONB => "jsonb",
        INT4RANGE => "int4range",
        NUMRANGE => "numrange",
        TSRANGE => "tsrange",
        TSTZRANGE => "tstzrange",
        DATERANGE => "daterange",
        INT8RANGE => "int8range",
        BOOL_ARRAY => "bool[]",
        BYTEA_ARRAY => "bytea[]",
        CHAR_ARRAY => "char[]",
        NAME_ARRAY => "name[]",
        INT2_ARRAY => "int2[]",
        INT4_ARRAY => "int4[]",
        TEXT_ARRAY => "text[]",
        BPCHAR_ARRAY => "bpchar[]",
        VARCHAR_ARRAY => "varchar[]",
        INT8_ARRAY => "int8[]",
        FLOAT4_ARRAY => "float4[]",
        FLOAT8_ARRAY => "float8[]",
        OID_ARRAY => "oid[]",
        TIMESTAMP_ARRAY => "timestamp[]",
        DATE_ARRAY => "date[]",
        TIME_ARRAY => "time[]",
        TIMESTAMPTZ_ARRAY => "timestamptz[]",
        INTERVAL_ARRAY => "interval[]",
        NUMERIC_ARRAY => "numeric[]",
        UUID_ARRAY => "uuid[]",
        JSON_ARRAY => "json[]",
        JSONB_ARRAY => "jsonb[]",
        _ => "?",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn array_element_mapping_is_bidirectional() {
        for array in [INT4_ARRAY, TEXT_ARRAY, NUMERIC_ARRAY, JSONB_ARRAY] {
            let elem = element_oid(array).unwrap();
            assert_eq!(array_oid(elem), Some(array));
        }
        assert_eq!(element_oid(INT4), None);
        assert!(is_array(FLOAT8_ARRAY));
        assert!(!is_array(FLOAT8));
    }

    #[test]
    fn names() {
        assert_eq!(type_name(INT4), "int4");
        assert_eq!(type_name(INT4_ARRAY), "int4[]");
        assert_eq!(type_name(999_999), "?");
    }
}
