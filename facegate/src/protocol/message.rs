//! 设备协议的消息类型
//! Message types of the device protocol
//!
//! 每帧一个 JSON 对象：
//! One JSON object per frame:
//!
//! - 请求 / request: `{ "method", "params", "req_id" }`
//! - 成功 / success: `{ "method", "params", "result": 0, "errMsg": "Success", "req_id" }`
//! - 失败 / error: `{ "method", "result": <code>, "errMsg", "req_id" }`

use crate::error::{Error, Result};
use crate::model::{Person, Record};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 响应结果码
/// Response result code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultCode {
  Success = 0,
  /// JSON 或参数错误
  /// Bad JSON or bad params
  BadParams = 100,
  /// 不支持的方法
  /// Unsupported method
  NotSupported = 105,
  /// 处理器内部错误
  /// Handler internal error
  Internal = 900,
}

impl ResultCode {
  pub fn code(self) -> i32 {
    self as i32
  }
}

/// 设备发起的方法
/// Device-initiated methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
  RegisterDevice,
  HeartBeat,
  UploadRecords,
  GetPersonCount,
  GetPersonsByPage,
  GetPersonsById,
  InsertPerson,
  UpdatePerson,
  RemovePerson,
  /// 未知方法，保留原始名称用于回显
  /// Unknown method, keeping the original name for the echo
  Unknown(String),
}

impl Method {
  pub fn from_name(name: &str) -> Self {
    match name {
      "registerDevice" => Method::RegisterDevice,
      "heartBeat" => Method::HeartBeat,
      "uploadRecords" => Method::UploadRecords,
      "getPersonCount" => Method::GetPersonCount,
      "getPersonsByPage" => Method::GetPersonsByPage,
      "getPersonsById" => Method::GetPersonsById,
      "insertPerson" => Method::InsertPerson,
      "updatePerson" => Method::UpdatePerson,
      "removePerson" => Method::RemovePerson,
      other => Method::Unknown(other.to_string()),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Method::RegisterDevice => "registerDevice",
      Method::HeartBeat => "heartBeat",
      Method::UploadRecords => "uploadRecords",
      Method::GetPersonCount => "getPersonCount",
      Method::GetPersonsByPage => "getPersonsByPage",
      Method::GetPersonsById => "getPersonsById",
      Method::InsertPerson => "insertPerson",
      Method::UpdatePerson => "updatePerson",
      Method::RemovePerson => "removePerson",
      Method::Unknown(name) if name.is_empty() => "unknown",
      Method::Unknown(name) => name,
    }
  }
}

/// 服务端发起的推送命令
/// Server-initiated push commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMethod {
  ChangePersons,
  RemoteOpenDoor,
  RelayOut,
  DisplayImage,
}

impl PushMethod {
  pub fn name(self) -> &'static str {
    match self {
      PushMethod::ChangePersons => "pushChangePersons",
      PushMethod::RemoteOpenDoor => "pushRemoteOpenDoor",
      PushMethod::RelayOut => "pushRelayOut",
      PushMethod::DisplayImage => "pushDisplayImage",
    }
  }
}

/// 入站请求帧
/// Inbound request frame
#[derive(Debug, Clone)]
pub struct InboundFrame {
  pub method: String,
  pub params: Value,
  pub req_id: i64,
}

impl InboundFrame {
  /// 只有文本不是 JSON 时才失败；外层字段按宽松规则读取
  /// Fails only when the text is not JSON; envelope fields are read leniently
  ///
  /// 非字符串的 method 视为空（即 "unknown"），req_id 接受整数、小数和数字字符串，否则为 0
  /// A non-string method counts as empty ("unknown"); req_id accepts integers, floats and
  /// numeric strings and falls back to 0
  pub fn parse(text: &str) -> serde_json::Result<Self> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut obj) = value else {
      return Ok(Self {
        method: String::new(),
        params: Value::Null,
        req_id: 0,
      });
    };
    let method = match obj.get("method") {
      Some(Value::String(m)) => m.clone(),
      _ => String::new(),
    };
    let req_id = lenient_i64(obj.get("req_id")).unwrap_or(0);
    Ok(Self {
      method,
      params: obj.remove("params").unwrap_or(Value::Null),
      req_id,
    })
  }

  pub fn method(&self) -> Method {
    Method::from_name(&self.method)
  }

  /// 把 params 解析为具体类型，缺省的 params 视为空对象
  /// Decode params into a concrete type; absent params count as an empty object
  pub fn params_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
    let params = match &self.params {
      Value::Null => Value::Object(Map::new()),
      other => other.clone(),
    };
    serde_json::from_value(params).map_err(|e| Error::invalid_params(e.to_string()))
  }
}

/// 出站响应信封
/// Outbound response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub method: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub params: Option<Value>,
  pub result: i32,
  #[serde(rename = "errMsg")]
  pub err_msg: String,
  pub req_id: i64,
}

impl Response {
  pub fn ok(method: &str, req_id: i64, params: Value) -> Self {
    Self {
      method: method.to_string(),
      params: Some(params),
      result: ResultCode::Success.code(),
      err_msg: "Success".to_string(),
      req_id,
    }
  }

  /// 不带参数的成功响应，params 为空对象
  /// Success without data; params is an empty object
  pub fn ack(method: &str, req_id: i64) -> Self {
    Self::ok(method, req_id, Value::Object(Map::new()))
  }

  pub fn error<S: Into<String>>(method: &str, req_id: i64, code: ResultCode, message: S) -> Self {
    Self {
      method: method.to_string(),
      params: None,
      result: code.code(),
      err_msg: message.into(),
      req_id,
    }
  }

  /// 无法解析的帧：method 为 "invalid"，req_id 为 0
  /// Unparseable frame: method "invalid", req_id 0
  pub fn bad_json() -> Self {
    Self::error("invalid", 0, ResultCode::BadParams, "Bad JSON")
  }

  pub fn is_success(&self) -> bool {
    self.result == ResultCode::Success.code()
  }

  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string(self)?)
  }
}

/// 服务端推送帧，不需要设备响应
/// Server push frame; no device response is expected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
  pub method: String,
  pub params: Value,
  pub req_id: u32,
}

impl PushFrame {
  pub fn new(method: PushMethod, params: Value, req_id: u32) -> Self {
    Self {
      method: method.name().to_string(),
      params,
      req_id,
    }
  }

  /// 编码为文本帧
  /// Encode as a text frame
  pub fn into_text(self) -> String {
    json!({ "method": self.method, "params": self.params, "req_id": self.req_id }).to_string()
  }
}

/// registerDevice 参数
/// registerDevice params
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterDeviceParams {
  #[serde(rename = "DeviceId")]
  pub device_id: Option<String>,
  #[serde(rename = "ProdType")]
  pub prod_type: Option<String>,
  #[serde(rename = "ProdName")]
  pub prod_name: Option<String>,
  #[serde(rename = "RelayOutSlots")]
  pub relay_out_slots: Option<i32>,
}

/// heartBeat 参数
/// heartBeat params
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartBeatParams {
  #[serde(rename = "DeviceId")]
  pub device_id: Option<String>,
}

/// uploadRecords 参数，记录保持原始 JSON 以便逐条解析
/// uploadRecords params; records stay raw JSON so each one is decoded on its own
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadRecordsParams {
  #[serde(rename = "DeviceId")]
  pub device_id: Option<String>,
  #[serde(rename = "RecordCount")]
  pub record_count: Option<i64>,
  #[serde(rename = "Records")]
  pub records: Option<Value>,
}

/// getPersonsByPage 参数
/// getPersonsByPage params
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonsByPageParams {
  #[serde(rename = "PersonCount")]
  pub person_count: Option<u64>,
  #[serde(rename = "Offset")]
  pub offset: Option<u64>,
}

/// 按 ID 引用人员
/// Reference to a person by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
  #[serde(rename = "PersonID")]
  pub person_id: String,
}

/// getPersonsById 参数
/// getPersonsById params
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonsByIdParams {
  #[serde(rename = "PersonCount")]
  pub person_count: Option<u64>,
  #[serde(rename = "Persons")]
  pub persons: Option<Vec<PersonRef>>,
}

/// 人员的会员扩展信息
/// Membership extension of a person entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtInfo {
  #[serde(rename = "MemberLevel")]
  pub member_level: String,
  /// RFC 3339，未设置时为 null
  /// RFC 3339, null when unset
  #[serde(rename = "MemberExpiry")]
  pub member_expiry: Option<String>,
  #[serde(rename = "IsApeLord")]
  pub is_ape_lord: bool,
}

/// 下发给设备的人员条目
/// Person entry sent to devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonEntry {
  #[serde(rename = "PersonID")]
  pub person_id: String,
  #[serde(rename = "PersonName")]
  pub person_name: String,
  #[serde(rename = "ICCardID")]
  pub ic_card_id: String,
  #[serde(rename = "IDCardNo")]
  pub id_card_no: String,
  #[serde(rename = "PassPlanIDs")]
  pub pass_plan_ids: Vec<i64>,
  /// base64 编码的 JPEG
  /// Base64-encoded JPEG
  #[serde(
    rename = "PersonPicture",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub person_picture: Option<String>,
  #[serde(rename = "ExtInfo", default, skip_serializing_if = "Option::is_none")]
  pub ext_info: Option<ExtInfo>,
}

impl PersonEntry {
  /// 不含照片和扩展信息的基本条目
  /// Base entry without picture or extension info
  pub fn from_person(person: &Person) -> Self {
    Self {
      person_id: person.phone.clone(),
      person_name: person.person_name.clone(),
      ic_card_id: person.ic_card_id.clone().unwrap_or_default(),
      id_card_no: person.id_card_no.clone().unwrap_or_default(),
      pass_plan_ids: person.pass_plan_ids.clone(),
      person_picture: None,
      ext_info: None,
    }
  }

  /// 附加会员信息（仅当设置了会员等级）
  /// Attach membership info (only when a member level is set)
  pub fn with_ext_info(mut self, person: &Person) -> Self {
    self.ext_info = person.member_level.as_ref().map(|level| ExtInfo {
      member_level: level.clone(),
      member_expiry: person.member_expiry.map(|t| t.to_rfc3339()),
      is_ape_lord: person.is_ape_lord,
    });
    self
  }
}

/// pushChangePersons 的增量变更
/// Incremental changes carried by pushChangePersons
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonChanges {
  #[serde(rename = "InsertPersons")]
  pub insert_persons: Vec<PersonEntry>,
  #[serde(rename = "UpdatePersons")]
  pub update_persons: Vec<PersonEntry>,
  #[serde(rename = "RemovePersons")]
  pub remove_persons: Vec<PersonRef>,
}

/// 增量同步模式
/// Incremental sync mode
pub const SYNC_MODE_INCREMENTAL: i32 = 2;

fn lenient_i64(value: Option<&Value>) -> Option<i64> {
  match value? {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    Value::Bool(b) => Some(i64::from(*b)),
    _ => None,
  }
}

/// 超出 i32 范围的值记录警告并取 0
/// Values outside the i32 range are logged and read as 0
fn lenient_i32(obj: &Map<String, Value>, key: &str) -> i32 {
  let Some(value) = lenient_i64(obj.get(key)) else {
    return 0;
  };
  i32::try_from(value).unwrap_or_else(|_| {
    tracing::warn!(field = key, value, "Record field out of range, using 0");
    0
  })
}

fn lenient_f64(value: Option<&Value>) -> Option<f64> {
  match value? {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn lenient_string(value: Option<&Value>) -> Option<String> {
  match value? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// 把设备上传的一条记录转换为 [`Record`]
/// Convert one device-uploaded record into a [`Record`]
///
/// 缺少或无效的 RecordID 会返回错误，由调用方记录日志并跳过；其他数值字段缺省为 0
/// A missing or invalid RecordID is an error for the caller to log and skip; other numeric
/// fields default to 0
pub fn parse_record(device_id: &str, raw: &Value) -> Result<Record> {
  let obj = raw
    .as_object()
    .ok_or_else(|| Error::invalid_params("record is not an object"))?;
  let record_id = lenient_i64(obj.get("RecordID"))
    .ok_or_else(|| Error::invalid_params("RecordID missing or invalid"))?;

  Ok(Record {
    device_id: device_id.to_string(),
    record_id,
    person_phone: lenient_string(obj.get("PersonID")),
    record_time: lenient_i64(obj.get("RecordTime")).unwrap_or(0),
    record_type: lenient_i32(obj, "RecordType"),
    record_pass: lenient_i32(obj, "RecordPass"),
    similarity: lenient_f64(obj.get("Similarity")),
    temperature: lenient_f64(obj.get("Temperature")),
    qrcode: lenient_string(obj.get("QRCode")),
    health_code_color: lenient_string(obj.get("HealthCodeColor")),
    raw: raw.clone(),
  })
}
