//! Static table of well-known Postgres type OIDs.
//!
//! Array OIDs are not contiguous with their element types and are listed
//! by hand against the upstream `pg_type.dat` catalog.

use crate::domain::Oid;

pub const BOOL: Oid = 16;
pub const BYTEA: Oid = 17;
pub const CHAR: Oid = 18;
pub const NAME: Oid = 19;
pub const INT8: Oid = 20;
pub const INT2: Oid = 21;
pub const INT4: Oid = 23;
pub const TEXT: Oid = 25;
pub const OID: Oid = 26;
pub const JSON: Oid = 114;
pub const XML: Oid = 142;
pub const CIDR: Oid = 650;
pub const FLOAT4: Oid = 700;
pub const FLOAT8: Oid = 701;
pub const UNKNOWN: Oid = 705;
pub const MONEY: Oid = 790;
pub const INET: Oid = 869;
pub const BPCHAR: Oid = 1042;
pub const VARCHAR: Oid = 1043;
pub const DATE: Oid = 1082;
pub const TIME: Oid = 1083;
pub const TIMESTAMP: Oid = 1114;
pub const TIMESTAMPTZ: Oid = 1184;
pub const TIMETZ: Oid = 1266;
pub const BIT: Oid = 1560;
pub const VARBIT: Oid = 1562;
pub const NUMERIC: Oid = 1700;
pub const UUID: Oid = 2950;
pub const JSONB: Oid = 3802;

pub const XML_ARRAY: Oid = 143;
pub const JSON_ARRAY: Oid = 199;
pub const CIDR_ARRAY: Oid = 651;
pub const MONEY_ARRAY: Oid = 791;
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
pub const INET_ARRAY: Oid = 1041;
pub const TIMESTAMP_ARRAY: Oid = 1115;
pub const DATE_ARRAY: Oid = 1182;
pub const TIME_ARRAY: Oid = 1183;
pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
pub const NUMERIC_ARRAY: Oid = 1231;
pub const TIMETZ_ARRAY: Oid = 1270;
pub const BIT_ARRAY: Oid = 1561;
pub const VARBIT_ARRAY: Oid = 1563;
pub const UUID_ARRAY: Oid = 2951;
pub const JSONB_ARRAY: Oid = 3807;

/// Element OID of a well-known array OID.
pub fn array_element(oid: Oid) -> Option<Oid> {
    let element = match oid {
        XML_ARRAY => XML,
        JSON_ARRAY => JSON,
        CIDR_ARRAY => CIDR,
        MONEY_ARRAY => MONEY,
        BOOL_ARRAY => BOOL,
        BYTEA_ARRAY => BYTEA,
        CHAR_ARRAY => CHAR,
        NAME_ARRAY => NAME,
        INT2_ARRAY => INT2,
        INT4_ARRAY => INT4,
        TEXT_ARRAY => TEXT,
        BPCHAR_ARRAY => BPCHAR,
        VARCHAR_ARRAY => VARCHAR,
        INT8_ARRAY => INT8,
        FLOAT4_ARRAY => FLOAT4,
        FLOAT8_ARRAY => FLOAT8,
        OID_ARRAY => OID,
        INET_ARRAY => INET,
        TIMESTAMP_ARRAY => TIMESTAMP,
        DATE_ARRAY => DATE,
        TIME_ARRAY => TIME,
        TIMESTAMPTZ_ARRAY => TIMESTAMPTZ,
        NUMERIC_ARRAY => NUMERIC,
        TIMETZ_ARRAY => TIMETZ,
        BIT_ARRAY => BIT,
        VARBIT_ARRAY => VARBIT,
        UUID_ARRAY => UUID,
        JSONB_ARRAY => JSONB,
        _ => return None,
    };
    Some(element)
}

/// Human-readable name of a built-in type, used in diagnostics.
pub fn type_name(oid: Oid) -> Option<&'static str> {
    let name = match oid {
        16 => "bool",
        17 => "bytea",
        18 => "char",
        19 => "name",
        20 => "int8",
        21 => "int2",
        22 => "int2vector",
        23 => "int4",
        24 => "regproc",
        25 => "text",
        26 => "oid",
        27 => "tid",
        28 => "xid",
        29 => "cid",
        30 => "oidvector",
        32 => "pg_ddl_command",
        71 => "pg_type",
        75 => "pg_attribute",
        81 => "pg_proc",
        83 => "pg_class",
        114 => "json",
        142 => "xml",
        143 => "_xml",
        194 => "pg_node_tree",
        199 => "_json",
        269 => "table_am_handler",
        325 => "index_am_handler",
        600 => "point",
        601 => "lseg",
        602 => "path",
        603 => "box",
        604 => "polygon",
        628 => "line",
        650 => "cidr",
        651 => "_cidr",
        700 => "float4",
        701 => "float8",
        705 => "unknown",
        718 => "circle",
        774 => "macaddr8",
        790 => "money",
        791 => "_money",
        829 => "macaddr",
        869 => "inet",
        1000 => "_bool",
        1001 => "_bytea",
        1002 => "_char",
        1003 => "_name",
        1005 => "_int2",
        1007 => "_int4",
        1009 => "_text",
        1014 => "_bpchar",
        1015 => "_varchar",
        1016 => "_int8",
        1021 => "_float4",
        1022 => "_float8",
        1028 => "_oid",
        1033 => "aclitem",
        1041 => "_inet",
        1042 => "bpchar",
        1043 => "varchar",
        1082 => "date",
        1083 => "time",
        1114 => "timestamp",
        1115 => "_timestamp",
        1182 => "_date",
        1183 => "_time",
        1184 => "timestamptz",
        1185 => "_timestamptz",
        1186 => "interval",
        1187 => "_interval",
        1231 => "_numeric",
        1266 => "timetz",
        1270 => "_timetz",
        1560 => "bit",
        1561 => "_bit",
        1562 => "varbit",
        1563 => "_varbit",
        1700 => "numeric",
        1790 => "refcursor",
        2202 => "regprocedure",
        2203 => "regoper",
        2204 => "regoperator",
        2205 => "regclass",
        2206 => "regtype",
        2249 => "record",
        2275 => "cstring",
        2276 => "any",
        2277 => "anyarray",
        2278 => "void",
        2279 => "trigger",
        2280 => "language_handler",
        2281 => "internal",
        2283 => "anyelement",
        2287 => "_record",
        2776 => "anynonarray",
        2950 => "uuid",
        2951 => "_uuid",
        2970 => "txid_snapshot",
        3115 => "fdw_handler",
        3220 => "pg_lsn",
        3310 => "tsm_handler",
        3361 => "pg_ndistinct",
        3402 => "pg_dependencies",
        3500 => "anyenum",
        3614 => "tsvector",
        3615 => "tsquery",
        3642 => "gtsvector",
        3734 => "regconfig",
        3769 => "regdictionary",
        3802 => "jsonb",
        3807 => "_jsonb",
        3831 => "anyrange",
        3838 => "event_trigger",
        3904 => "int4range",
        3906 => "numrange",
        3908 => "tsrange",
        3910 => "tstzrange",
        3912 => "daterange",
        3926 => "int8range",
        4072 => "jsonpath",
        4089 => "regnamespace",
        4096 => "regrole",
        4191 => "regcollation",
        4451 => "int4multirange",
        4532 => "nummultirange",
        4533 => "tsmultirange",
        4534 => "tstzmultirange",
        4535 => "datemultirange",
        4536 => "int8multirange",
        4537 => "anymultirange",
        4538 => "anycompatiblemultirange",
        4600 => "pg_brin_bloom_summary",
        4601 => "pg_brin_minmax_multi_summary",
        5017 => "pg_mcv_list",
        5038 => "pg_snapshot",
        5069 => "xid8",
        5077 => "anycompatible",
        5078 => "anycompatiblearray",
        5079 => "anycompatiblenonarray",
        5080 => "anycompatiblerange",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_elements() {
        assert_eq!(array_element(INT4_ARRAY), Some(INT4));
        assert_eq!(array_element(BYTEA_ARRAY), Some(BYTEA));
        assert_eq!(array_element(JSONB_ARRAY), Some(JSONB));
        assert_eq!(array_element(INT4), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(INT4), Some("int4"));
        assert_eq!(type_name(INT4_ARRAY), Some("_int4"));
        assert_eq!(type_name(3614), Some("tsvector"));
        assert_eq!(type_name(9000), None);
    }

    #[test]
    fn test_every_array_has_a_name_and_named_element() {
        for oid in 0..10_000 {
            if let Some(element) = array_element(oid) {
                let array_name = type_name(oid).unwrap();
                let element_name = type_name(element).unwrap();
                assert_eq!(array_name, format!("_{element_name}"));
            }
        }
    }
}
